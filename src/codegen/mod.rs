//! Short code generation and custom code validation.

mod alphabet;
mod generator;
mod policy;

pub use alphabet::{code_space, decode, encode, encode_fixed, is_alphabet_symbol, ALPHABET, BASE};
pub use generator::{
    random_code, recommend_length, CodeGenerator, CodeLookup, GeneratedCode, Tier,
};
pub use policy::{CodePolicy, DEFAULT_RESERVED_WORDS};
