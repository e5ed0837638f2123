//! The reconstructed output: address/name pairs in kernel storage order.

/// One recovered `(address, name)` pair. `name` is kept as raw bytes because
/// the kallsyms encoding does not guarantee UTF-8 for adversarial input; use
/// [`Symbol::name_str`] to decode lazily when the caller wants a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub address: u64,
    pub name: Vec<u8>,
}

impl Symbol {
    /// Decodes the name as UTF-8, surfacing the failure rather than lossily
    /// replacing invalid bytes.
    pub fn name_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.name)
    }
}
