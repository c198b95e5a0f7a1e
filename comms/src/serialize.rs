/// Writes a value into the wire format of the protocol.
pub trait Serialize<'a> {
    /// Serializes `self`.
    ///
    /// # Arguments
    /// * `buf` - The buffer where the owned part of the message is written.
    ///
    /// # Returns
    /// An optional borrowed slice that must be written right after `buf`, used
    /// to send numeric payloads without copying them.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
