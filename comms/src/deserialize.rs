use std::io;

/// Reads a value back from the wire format of the protocol.
pub trait Deserialize<'a>: Sized {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self>;
}
