//! Session Transition Circuit
//!
//! Relation: the prover knows an identifier vector whose Poseidon hash is
//! the public commitment, and the three public u64 fields of the claim are
//! range-checked 64-bit values.
//!
//! ```text
//!  private identifiers ──► Poseidon(ConstantLength<ARITY>) ──► instance[3]
//!  gameId            ──► 64-bit running sum ──────────────────► instance[0]
//!  currentSessionKey ──► 64-bit running sum ──────────────────► instance[1]
//!  newSessionKey     ──► 64-bit running sum ──────────────────► instance[2]
//! ```
//!
//! Whether `currentSessionKey → newSessionKey` is a permitted rotation is
//! not part of the relation. That is checked by the ledger against live
//! state.

use ff::Field;
use halo2_gadgets::poseidon::{
    primitives::{ConstantLength, P128Pow5T3},
    Hash as PoseidonHash, Pow5Chip, Pow5Config,
};
use halo2_proofs::{
    circuit::{AssignedCell, Layouter, SimpleFloorPlanner, Value},
    plonk::{Advice, Circuit, Column, ConstraintSystem, Error, Expression, Instance, Selector},
    poly::Rotation,
};

use crate::core::field::Fp;
use crate::proof::identifier::{DeviceIdentifierVector, IDENTIFIER_ARITY, POSEIDON_RATE, POSEIDON_WIDTH};
use crate::proof::public_inputs::{
    SessionTransitionClaim, COMMITMENT_ROW, CURRENT_KEY_ROW, GAME_ID_ROW, NEW_KEY_ROW,
};

/// log2 of the circuit row count.
pub const K: u32 = 10;

/// Bit width enforced on every public integer.
pub const RANGE_BITS: usize = 64;

/// Column and gate layout.
#[derive(Clone, Debug)]
pub struct SessionTransitionConfig {
    advice: [Column<Advice>; 4],
    instance: Column<Instance>,
    range_selector: Selector,
    poseidon: Pow5Config<Fp, POSEIDON_WIDTH, POSEIDON_RATE>,
}

/// Circuit proving knowledge of identifiers behind a commitment.
#[derive(Clone, Debug)]
pub struct SessionTransitionCircuit<const ARITY: usize = IDENTIFIER_ARITY> {
    identifiers: Value<[Fp; ARITY]>,
    game_id: Value<u64>,
    current_session_key: Value<u64>,
    new_session_key: Value<u64>,
}

impl<const ARITY: usize> Default for SessionTransitionCircuit<ARITY> {
    fn default() -> Self {
        Self {
            identifiers: Value::unknown(),
            game_id: Value::unknown(),
            current_session_key: Value::unknown(),
            new_session_key: Value::unknown(),
        }
    }
}

impl<const ARITY: usize> SessionTransitionCircuit<ARITY> {
    /// Circuit with a full witness.
    pub fn new(claim: &SessionTransitionClaim, identifiers: &DeviceIdentifierVector<ARITY>) -> Self {
        Self {
            identifiers: Value::known(*identifiers.elements()),
            game_id: Value::known(claim.game_id),
            current_session_key: Value::known(claim.current_session_key),
            new_session_key: Value::known(claim.new_session_key),
        }
    }

    /// Decompose `value` into 64 bits (MSB first) and return the final
    /// running-sum cell, which equals `value` iff it fits in 64 bits.
    fn assign_u64(
        config: &SessionTransitionConfig,
        mut layouter: impl Layouter<Fp>,
        name: &'static str,
        value: Value<u64>,
    ) -> Result<AssignedCell<Fp, Fp>, Error> {
        layouter.assign_region(
            || name,
            |mut region| {
                let mut acc = region.assign_advice_from_constant(
                    || "acc 0",
                    config.advice[1],
                    0,
                    Fp::ZERO,
                )?;
                let mut acc_value = Value::known(Fp::ZERO);

                for row in 0..RANGE_BITS {
                    config.range_selector.enable(&mut region, row)?;

                    let shift = RANGE_BITS - 1 - row;
                    let bit = value.map(|v| Fp::from((v >> shift) & 1));
                    region.assign_advice(|| format!("bit {}", row), config.advice[0], row, || bit)?;

                    acc_value = acc_value.zip(bit).map(|(a, b)| a + a + b);
                    acc = region.assign_advice(
                        || format!("acc {}", row + 1),
                        config.advice[1],
                        row + 1,
                        || acc_value,
                    )?;
                }

                Ok(acc)
            },
        )
    }
}

impl<const ARITY: usize> Circuit<Fp> for SessionTransitionCircuit<ARITY> {
    type Config = SessionTransitionConfig;
    type FloorPlanner = SimpleFloorPlanner;

    fn without_witnesses(&self) -> Self {
        Self::default()
    }

    fn configure(meta: &mut ConstraintSystem<Fp>) -> Self::Config {
        let advice = [
            meta.advice_column(),
            meta.advice_column(),
            meta.advice_column(),
            meta.advice_column(),
        ];
        let instance = meta.instance_column();

        meta.enable_equality(instance);
        for column in &advice {
            meta.enable_equality(*column);
        }

        let constants = meta.fixed_column();
        meta.enable_constant(constants);

        let rc_a = [meta.fixed_column(), meta.fixed_column(), meta.fixed_column()];
        let rc_b = [meta.fixed_column(), meta.fixed_column(), meta.fixed_column()];
        let poseidon = Pow5Chip::configure::<P128Pow5T3>(
            meta,
            [advice[0], advice[1], advice[2]],
            advice[3],
            rc_a,
            rc_b,
        );

        let range_selector = meta.selector();

        // bit * (1 - bit) = 0
        // acc' = 2 * acc + bit
        meta.create_gate("u64 running sum", |meta| {
            let s = meta.query_selector(range_selector);
            let bit = meta.query_advice(advice[0], Rotation::cur());
            let acc = meta.query_advice(advice[1], Rotation::cur());
            let acc_next = meta.query_advice(advice[1], Rotation::next());
            let one = Expression::Constant(Fp::ONE);
            let two = Expression::Constant(Fp::from(2u64));

            vec![
                s.clone() * bit.clone() * (one - bit.clone()),
                s * (acc_next - (acc * two + bit)),
            ]
        });

        SessionTransitionConfig {
            advice,
            instance,
            range_selector,
            poseidon,
        }
    }

    fn synthesize(
        &self,
        config: Self::Config,
        mut layouter: impl Layouter<Fp>,
    ) -> Result<(), Error> {
        let cells = layouter.assign_region(
            || "identifiers",
            |mut region| {
                (0..ARITY)
                    .map(|i| {
                        region.assign_advice(
                            || format!("identifier {}", i),
                            config.advice[0],
                            i,
                            || self.identifiers.map(|ids| ids[i]),
                        )
                    })
                    .collect::<Result<Vec<_>, Error>>()
            },
        )?;
        let message: [AssignedCell<Fp, Fp>; ARITY] = cells
            .try_into()
            .map_err(|_| Error::Synthesis)?;

        let hasher = PoseidonHash::<_, _, P128Pow5T3, ConstantLength<ARITY>, POSEIDON_WIDTH, POSEIDON_RATE>::init(
            Pow5Chip::construct(config.poseidon.clone()),
            layouter.namespace(|| "identifier hasher"),
        )?;
        let commitment = hasher.hash(layouter.namespace(|| "commit identifiers"), message)?;

        let game_id = Self::assign_u64(
            &config,
            layouter.namespace(|| "game id"),
            "range check game id",
            self.game_id,
        )?;
        let current_key = Self::assign_u64(
            &config,
            layouter.namespace(|| "current session key"),
            "range check current session key",
            self.current_session_key,
        )?;
        let new_key = Self::assign_u64(
            &config,
            layouter.namespace(|| "new session key"),
            "range check new session key",
            self.new_session_key,
        )?;

        layouter.constrain_instance(game_id.cell(), config.instance, GAME_ID_ROW)?;
        layouter.constrain_instance(current_key.cell(), config.instance, CURRENT_KEY_ROW)?;
        layouter.constrain_instance(new_key.cell(), config.instance, NEW_KEY_ROW)?;
        layouter.constrain_instance(commitment.cell(), config.instance, COMMITMENT_ROW)?;

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
