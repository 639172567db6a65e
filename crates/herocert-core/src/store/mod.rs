// # Certificate Store Implementations
//
// Implementations of the CertificateStore trait for different persistence
// strategies.

pub mod file;
pub mod memory;

pub use file::FileCertificateStore;
pub use memory::MemoryCertificateStore;
