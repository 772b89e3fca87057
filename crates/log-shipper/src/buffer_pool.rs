// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Recyclable byte buffers for payload compression.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

const DEFAULT_MAX_POOLED_BUFFERS: usize = 4;
// Buffers that grew past this are dropped instead of being kept around.
const DEFAULT_MAX_POOLED_CAPACITY: usize = 8 * 1024 * 1024;

/// A small pool of reusable `Vec<u8>` buffers.
///
/// Buffers are handed out as [`PooledBuffer`] guards and go back to the pool when
/// the guard is dropped.
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_pooled_buffers: usize,
    max_pooled_capacity: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POOLED_BUFFERS, DEFAULT_MAX_POOLED_CAPACITY)
    }
}

impl BufferPool {
    pub fn new(max_pooled_buffers: usize, max_pooled_capacity: usize) -> Self {
        BufferPool {
            buffers: Mutex::new(Vec::with_capacity(max_pooled_buffers)),
            max_pooled_buffers,
            max_pooled_capacity,
        }
    }

    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let buffer = self
            .buffers
            .lock()
            .ok()
            .and_then(|mut buffers| buffers.pop())
            .unwrap_or_default();
        PooledBuffer {
            buffer,
            pool: Arc::clone(self),
        }
    }

    pub fn pooled(&self) -> usize {
        self.buffers.lock().map(|buffers| buffers.len()).unwrap_or(0)
    }

    fn release(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() > self.max_pooled_capacity {
            return;
        }
        buffer.clear();
        if let Ok(mut buffers) = self.buffers.lock() {
            if buffers.len() < self.max_pooled_buffers {
                buffers.push(buffer);
            }
        }
    }
}

/// A buffer on loan from a [`BufferPool`].
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buffer));
    }
}
