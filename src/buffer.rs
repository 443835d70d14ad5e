//! Pooled output buffers.
//!
//! Every datagram is assembled into a [`PacketBuffer`] drawn from a global
//! free-list. The packer is the sole writer during assembly; ownership
//! moves to the caller with the packed result, and the send path releases
//! the buffer once the datagram is on the wire.

use bytes::BytesMut;
use once_cell::sync::Lazy;
use std::sync::Mutex;

use crate::types::MAX_PACKET_BUFFER_SIZE;

/// Number of idle buffers kept around for reuse
const POOL_CAPACITY: usize = 32;

static POOL: Lazy<Mutex<Vec<BytesMut>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// A reusable datagram-sized output buffer
#[derive(Debug)]
pub struct PacketBuffer {
    pub data: BytesMut,
}

impl PacketBuffer {
    /// Take a buffer from the pool, or allocate one
    pub fn acquire() -> Self {
        let data = POOL
            .lock()
            .expect("buffer pool poisoned")
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(MAX_PACKET_BUFFER_SIZE));
        Self { data }
    }

    /// Return the buffer to the pool
    pub fn release(mut self) {
        self.data.clear();
        let mut pool = POOL.lock().expect("buffer pool poisoned");
        if pool.len() < POOL_CAPACITY {
            pool.push(self.data);
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
