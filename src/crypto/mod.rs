//! Protocol cryptography: secp256r1 ECDSA key pairs and signatures.

pub mod key_pair;
