//! Fan-out of a single body stream to independent readers.
//!
//! Every reader observes the same chunks in the same order. Readers keep
//! their own cursor into a shared buffer, so a slow reader never holds back
//! a fast one: whichever reader needs the next chunk pulls it from the
//! source and the chunk stays buffered until every live reader has passed it.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use futures::task::{waker, ArcWake, AtomicWaker};

use crate::body::{BodyError, BodyStream};

enum SourceState {
    Live(BodyStream),
    Ended,
    Failed(BodyError),
}

struct Shared {
    source: SourceState,
    chunks: VecDeque<Bytes>,
    /// Absolute index of `chunks[0]`.
    offset: usize,
    /// Absolute read position per reader, `None` once dropped.
    cursors: Vec<Option<usize>>,
}

impl Shared {
    fn trim(&mut self) {
        let Some(min) = self.cursors.iter().flatten().min().copied() else {
            self.chunks.clear();
            return;
        };
        while self.offset < min && self.chunks.pop_front().is_some() {
            self.offset += 1;
        }
    }
}

struct ReaderWakers(Vec<AtomicWaker>);

impl ArcWake for ReaderWakers {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        for waker in &arc_self.0 {
            waker.wake();
        }
    }
}

/// One reader of a teed stream.
pub struct TeeReader {
    id: usize,
    shared: Arc<Mutex<Shared>>,
    wakers: Arc<ReaderWakers>,
    finished: bool,
}

/// Split `source` into `readers` independent readers.
pub fn tee(source: BodyStream, readers: usize) -> Vec<TeeReader> {
    let (shared, wakers) = shared_state(source, readers);
    (0..readers)
        .map(|id| TeeReader::new(id, &shared, &wakers))
        .collect()
}

/// Split `source` into exactly two readers.
pub fn tee_pair(source: BodyStream) -> (TeeReader, TeeReader) {
    let (shared, wakers) = shared_state(source, 2);
    (
        TeeReader::new(0, &shared, &wakers),
        TeeReader::new(1, &shared, &wakers),
    )
}

fn shared_state(source: BodyStream, readers: usize) -> (Arc<Mutex<Shared>>, Arc<ReaderWakers>) {
    let shared = Arc::new(Mutex::new(Shared {
        source: SourceState::Live(source),
        chunks: VecDeque::new(),
        offset: 0,
        cursors: vec![Some(0); readers],
    }));
    let wakers = Arc::new(ReaderWakers(
        (0..readers).map(|_| AtomicWaker::new()).collect(),
    ));
    (shared, wakers)
}

impl TeeReader {
    fn new(id: usize, shared: &Arc<Mutex<Shared>>, wakers: &Arc<ReaderWakers>) -> Self {
        Self {
            id,
            shared: Arc::clone(shared),
            wakers: Arc::clone(wakers),
            finished: false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Chunks currently held in the shared buffer.
    pub fn buffered(&self) -> usize {
        self.lock().chunks.len()
    }
}

impl Stream for TeeReader {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        this.wakers.0[this.id].register(cx.waker());

        let shared_waker = waker(Arc::clone(&this.wakers));
        let mut source_cx = Context::from_waker(&shared_waker);
        let mut shared = this.shared.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            let Some(cursor) = shared.cursors[this.id] else {
                return Poll::Ready(None);
            };

            if cursor < shared.offset + shared.chunks.len() {
                let chunk = shared.chunks[cursor - shared.offset].clone();
                shared.cursors[this.id] = Some(cursor + 1);
                shared.trim();
                return Poll::Ready(Some(Ok(chunk)));
            }

            let polled = match &mut shared.source {
                SourceState::Live(stream) => stream.poll_next_unpin(&mut source_cx),
                SourceState::Ended => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
                SourceState::Failed(err) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(err.clone())));
                }
            };

            match polled {
                Poll::Ready(Some(Ok(chunk))) => shared.chunks.push_back(chunk),
                Poll::Ready(Some(Err(err))) => shared.source = SourceState::Failed(err),
                Poll::Ready(None) => shared.source = SourceState::Ended,
                Poll::Pending => return Poll::Pending,
            }
            ArcWake::wake_by_ref(&this.wakers);
        }
    }
}

impl Drop for TeeReader {
    fn drop(&mut self) {
        let mut shared = self.lock();
        shared.cursors[self.id] = None;
        shared.trim();
    }
}
