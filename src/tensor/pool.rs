use std::collections::HashMap;
use std::sync::Mutex;

use crate::errors::{NeuriteError, NeuriteResult};
use crate::types::AllocMode;

/// Upper bound on a single buffer, in f32 elements. Requests beyond this are
/// almost certainly a shape-arithmetic bug upstream.
const MAX_BUFFER_LEN: usize = 1 << 31;

/// Default retention ceiling: free lists keep at most this many floats.
const DEFAULT_RETAINED_LIMIT: usize = 1 << 26;

/// Recycling allocator for tensor buffers. Free lists are keyed by buffer
/// length; acquire pops a recycled vector or allocates a fresh one, release
/// pushes the vector back. The mutex is held only for the free-list
/// operation itself.
pub struct TensorPool {
    free: Mutex<FreeLists>,
    retained_limit: usize,
}

struct FreeLists {
    by_len: HashMap<usize, Vec<Vec<f32>>>,
    retained: usize,
}

impl TensorPool {
    pub fn new() -> Self {
        TensorPool::with_retained_limit(DEFAULT_RETAINED_LIMIT)
    }

    /// `retained_limit` caps the total number of floats kept on free lists;
    /// buffers recycled past the cap are dropped instead.
    pub fn with_retained_limit(retained_limit: usize) -> Self {
        TensorPool {
            free: Mutex::new(FreeLists {
                by_len: HashMap::new(),
                retained: 0,
            }),
            retained_limit,
        }
    }

    pub(crate) fn acquire(&self, len: usize, mode: AllocMode) -> NeuriteResult<Vec<f32>> {
        if len == 0 {
            return Err(NeuriteError::InvalidArgument(
                "cannot allocate an empty tensor buffer".into(),
            ));
        }
        if len > MAX_BUFFER_LEN {
            return Err(NeuriteError::ResourceExhausted(format!(
                "tensor buffer of {} floats exceeds the pool limit",
                len
            )));
        }
        let recycled = {
            let mut lists = self.free.lock().expect("tensor pool lock poisoned");
            let buf = lists.by_len.get_mut(&len).and_then(|v| v.pop());
            if buf.is_some() {
                lists.retained -= len;
            }
            buf
        };
        match recycled {
            Some(mut buf) => {
                if mode == AllocMode::Clean {
                    buf.iter_mut().for_each(|v| *v = 0.0);
                }
                Ok(buf)
            }
            None => Ok(vec![0.0; len]),
        }
    }

    pub(crate) fn recycle(&self, buf: Vec<f32>) {
        let len = buf.len();
        if len == 0 {
            return;
        }
        let mut lists = self.free.lock().expect("tensor pool lock poisoned");
        if lists.retained + len > self.retained_limit {
            return; // drop the buffer, the ceiling is reached
        }
        lists.retained += len;
        lists.by_len.entry(len).or_default().push(buf);
    }

    /// Total floats currently parked on free lists.
    pub fn retained(&self) -> usize {
        self.free.lock().expect("tensor pool lock poisoned").retained
    }
}

impl Default for TensorPool {
    fn default() -> Self {
        TensorPool::new()
    }
}
