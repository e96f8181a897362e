pub mod shutdown;
pub mod signature;
pub mod signer;
