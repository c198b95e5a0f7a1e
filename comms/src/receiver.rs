//! The implementation of the receiving end of the application layer protocol.

use std::io;

use bytemuck::Zeroable;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Align8, Deserialize, LEN_TYPE_SIZE, LenType};

/// The receiving end handle of the communication.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
    buf: Vec<u64>,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    /// Creates a new `OnoReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self { rx, buf: Vec::new() }
    }

    /// Waits to receive a new message using the receiver's own buffer.
    ///
    /// # Returns
    /// A result object that returns `T` on success or `io::Error` on failure.
    pub async fn recv<'s, T>(&'s mut self) -> io::Result<T>
    where
        T: Deserialize<'s>,
    {
        let Self { rx, buf } = self;
        read_frame(rx, buf).await
    }

    /// Waits to receive a new message from the inner receiver.
    ///
    /// # Arguments
    /// * `buf` - The buffer to use for deserialization, the returned
    ///   `T`'s lifetimes will be tied to this buffer.
    ///
    /// # Returns
    /// A result object that returns `T` on success or `io::Error` on failure.
    pub async fn recv_into<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Align8,
    {
        read_frame(&mut self.rx, buf).await
    }
}

async fn read_frame<'buf, R, T, B>(rx: &mut R, buf: &'buf mut Vec<B>) -> io::Result<T>
where
    R: AsyncRead + Unpin,
    T: Deserialize<'buf>,
    B: Align8,
{
    let mut size_buf = [0; LEN_TYPE_SIZE];
    rx.read_exact(&mut size_buf).await?;
    let len = LenType::from_be_bytes(size_buf) as usize;

    let needed_amount = len.div_ceil(size_of::<B>());
    buf.clear();
    buf.resize(needed_amount, <B as Zeroable>::zeroed());

    let view: &mut [u8] = bytemuck::cast_slice_mut(buf);
    let slice = &mut view[..len];
    rx.read_exact(slice).await?;

    T::deserialize(slice)
}
