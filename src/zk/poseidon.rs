//! Poseidon permutation over the BN254 scalar field.
//!
//! Width 3 (one capacity element, two inputs), S-box `x^5`, 8 full rounds
//! and 57 partial rounds. Round constants and the MDS matrix both come from
//! one Grain LFSR stream as described in the Poseidon paper, giving the
//! same permutation as circomlib and go-iden3-crypto. The MDS matrix is the
//! Cauchy matrix `1 / (x_i + y_j)` over the `2t` elements drawn right after
//! the round constants.

use num_bigint::BigUint;
use num_traits::{One, Zero};
use once_cell::sync::Lazy;

use super::hash::{byte32_from_bytes, Byte32};
use super::hasher::HashError;

const WIDTH: usize = 3;
const FULL_ROUNDS: usize = 8;
const PARTIAL_ROUNDS: usize = 57;
const FIELD_BITS: usize = 254;

const MODULUS_BE: [u8; 32] = [
    0x30, 0x64, 0x4e, 0x72, 0xe1, 0x31, 0xa0, 0x29, 0xb8, 0x50, 0x45, 0xb6, 0x81, 0x81, 0x58, 0x5d,
    0x28, 0x33, 0xe8, 0x48, 0x79, 0xb9, 0x70, 0x91, 0x43, 0xe1, 0xf5, 0x93, 0xf0, 0x00, 0x00, 0x01,
];

/// The BN254 scalar field modulus
pub static MODULUS: Lazy<BigUint> = Lazy::new(|| BigUint::from_bytes_be(&MODULUS_BE));

struct Params {
    round_constants: Vec<BigUint>,
    mds: Vec<Vec<BigUint>>,
}

static PARAMS: Lazy<Params> = Lazy::new(Params::generate);

/// Grain LFSR in self-shrinking mode
struct Grain {
    state: Vec<bool>,
}

impl Grain {
    fn new() -> Self {
        let mut state = Vec::with_capacity(80);
        let mut push = |value: u64, bits: usize| {
            for i in (0..bits).rev() {
                state.push((value >> i) & 1 == 1);
            }
        };
        push(1, 2); // prime field
        push(0, 4); // x^alpha S-box
        push(FIELD_BITS as u64, 12);
        push(WIDTH as u64, 12);
        push(FULL_ROUNDS as u64, 10);
        push(PARTIAL_ROUNDS as u64, 10);
        push((1 << 30) - 1, 30);

        let mut grain = Grain { state };
        for _ in 0..160 {
            grain.clock();
        }
        grain
    }

    fn clock(&mut self) -> bool {
        let s = &self.state;
        let bit = s[62] ^ s[51] ^ s[38] ^ s[23] ^ s[13] ^ s[0];
        self.state.remove(0);
        self.state.push(bit);
        bit
    }

    fn next_bit(&mut self) -> bool {
        loop {
            if self.clock() {
                return self.clock();
            }
            self.clock();
        }
    }

    fn next_bits(&mut self) -> BigUint {
        let mut value = BigUint::zero();
        for _ in 0..FIELD_BITS {
            value <<= 1;
            if self.next_bit() {
                value |= BigUint::one();
            }
        }
        value
    }

    /// Draw a field element by rejection sampling
    fn next_field_element(&mut self, modulus: &BigUint) -> BigUint {
        loop {
            let value = self.next_bits();
            if &value < modulus {
                return value;
            }
        }
    }

    /// Draw a field element reduced modulo `modulus`
    fn next_reduced(&mut self, modulus: &BigUint) -> BigUint {
        self.next_bits() % modulus
    }
}

impl Params {
    fn generate() -> Self {
        let p = &*MODULUS;
        let mut grain = Grain::new();
        let round_constants = (0..(FULL_ROUNDS + PARTIAL_ROUNDS) * WIDTH)
            .map(|_| grain.next_field_element(p))
            .collect();

        let (xs, ys) = loop {
            let drawn: Vec<BigUint> = (0..2 * WIDTH).map(|_| grain.next_reduced(p)).collect();
            let (xs, ys) = drawn.split_at(WIDTH);
            let distinct = drawn.iter().enumerate().all(|(i, a)| drawn[i + 1..].iter().all(|b| a != b));
            let invertible = xs.iter().all(|x| ys.iter().all(|y| !((x + y) % p).is_zero()));
            if distinct && invertible {
                break (xs.to_vec(), ys.to_vec());
            }
        };

        let exp = p - BigUint::from(2u32);
        let mds = xs
            .iter()
            .map(|x| ys.iter().map(|y| ((x + y) % p).modpow(&exp, p)).collect())
            .collect();

        Params { round_constants, mds }
    }
}

fn sbox(x: &BigUint, p: &BigUint) -> BigUint {
    let x2 = (x * x) % p;
    let x4 = (&x2 * &x2) % p;
    (x4 * x) % p
}

fn permute(state: &mut [BigUint; WIDTH]) {
    let p = &*MODULUS;
    let params = &*PARAMS;
    let half_full = FULL_ROUNDS / 2;

    for round in 0..FULL_ROUNDS + PARTIAL_ROUNDS {
        for (i, elem) in state.iter_mut().enumerate() {
            *elem = (&*elem + &params.round_constants[round * WIDTH + i]) % p;
        }

        let full = round < half_full || round >= half_full + PARTIAL_ROUNDS;
        if full {
            for elem in state.iter_mut() {
                *elem = sbox(elem, p);
            }
        } else {
            state[0] = sbox(&state[0], p);
        }

        let mixed: Vec<BigUint> = params
            .mds
            .iter()
            .map(|row| {
                row.iter()
                    .zip(state.iter())
                    .fold(BigUint::zero(), |acc, (m, s)| (acc + m * s) % p)
            })
            .collect();
        for (elem, value) in state.iter_mut().zip(mixed) {
            *elem = value;
        }
    }
}

fn to_field(word: &Byte32) -> Result<BigUint, HashError> {
    let value = BigUint::from_bytes_be(word);
    if value >= *MODULUS {
        return Err(HashError::NotInField(format!("0x{}", hex::encode(word))));
    }
    Ok(value)
}

/// Compress two field elements
pub fn hash_pair(fst: &Byte32, snd: &Byte32) -> Result<Byte32, HashError> {
    let mut state = [BigUint::zero(), to_field(fst)?, to_field(snd)?];
    permute(&mut state);
    Ok(byte32_from_bytes(&state[0].to_bytes_be()))
}
