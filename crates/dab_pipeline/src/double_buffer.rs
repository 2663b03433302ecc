//! Bounded hand-off between the demodulator and the radio decoder.
//!
//! Two equally sized buffers rotate between the producer and consumer
//! sides over rendezvous channels, so the stages run in parallel without
//! allocation and frames arrive strictly in order. Closing from either
//! side wakes all waiters; subsequent acquires return the shutdown
//! sentinel (None).

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct Shared<T> {
    filled_tx: Sender<Vec<T>>,
    filled_rx: Receiver<Vec<T>>,
    recycled_tx: Sender<Vec<T>>,
    recycled_rx: Receiver<Vec<T>>,
    is_closed: AtomicBool,
}

impl<T> Shared<T> {
    fn close(&self) {
        self.is_closed.store(true, Ordering::SeqCst);
        // drain both channels so blocked senders and receivers wake up
        while self.filled_rx.try_recv().is_ok() {}
        while self.recycled_rx.try_recv().is_ok() {}
        // sentinels unblock any side still waiting on a recv
        let _ = self.filled_tx.try_send(Vec::new());
        let _ = self.recycled_tx.try_send(Vec::new());
    }
}

/// Producer side of the hand-off.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    /// The buffer currently being filled.
    inactive: Option<Vec<T>>,
}

/// Consumer side of the hand-off.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    active: Option<Vec<T>>,
}

/// Creates a double buffer of `length` elements per side.
pub fn create_double_buffer<T: Default + Clone + Send + 'static>(
    length: usize,
) -> (Producer<T>, Consumer<T>) {
    let (filled_tx, filled_rx) = bounded::<Vec<T>>(1);
    let (recycled_tx, recycled_rx) = bounded::<Vec<T>>(1);
    // one buffer starts on the producer side, the other in the recycle slot
    recycled_tx
        .send(vec![T::default(); length])
        .expect("fresh recycle channel has capacity");
    let shared = Arc::new(Shared {
        filled_tx,
        filled_rx,
        recycled_tx,
        recycled_rx,
        is_closed: AtomicBool::new(false),
    });
    (
        Producer {
            shared: shared.clone(),
            inactive: Some(vec![T::default(); length]),
        },
        Consumer { shared, active: None },
    )
}

impl<T> Producer<T> {
    /// The buffer the producer may fill. None after close.
    pub fn acquire_inactive(&mut self) -> Option<&mut [T]> {
        if self.shared.is_closed.load(Ordering::SeqCst) {
            return None;
        }
        if self.inactive.is_none() {
            // wait for the consumer to recycle a buffer
            let buffer = self.shared.recycled_rx.recv().ok()?;
            if self.shared.is_closed.load(Ordering::SeqCst) {
                return None;
            }
            self.inactive = Some(buffer);
        }
        self.inactive.as_mut().map(|buffer| buffer.as_mut_slice())
    }

    /// Publishes the filled buffer to the consumer, blocking while the
    /// previous frame has not been consumed. Returns false on shutdown.
    pub fn release_inactive(&mut self) -> bool {
        let Some(buffer) = self.inactive.take() else {
            return false;
        };
        if self.shared.is_closed.load(Ordering::SeqCst) {
            return false;
        }
        match self.shared.filled_tx.try_send(buffer) {
            Ok(()) => true,
            Err(TrySendError::Full(buffer)) => {
                // consumer still holds the previous frame; rendezvous
                self.shared.filled_tx.send(buffer).is_ok() && !self.shared.is_closed.load(Ordering::SeqCst)
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn close(&self) {
        self.shared.close();
    }
}

impl<T> Consumer<T> {
    /// Blocks until a filled buffer is available. None after close.
    pub fn acquire_active(&mut self) -> Option<&[T]> {
        if self.active.is_none() {
            let buffer = self.shared.filled_rx.recv().ok()?;
            if self.shared.is_closed.load(Ordering::SeqCst) {
                return None;
            }
            self.active = Some(buffer);
        }
        self.active.as_deref()
    }

    /// Returns the consumed buffer to the producer side.
    pub fn release_active(&mut self) {
        if let Some(buffer) = self.active.take() {
            if !self.shared.is_closed.load(Ordering::SeqCst) {
                let _ = self.shared.recycled_tx.send(buffer);
            }
        }
    }

    pub fn close(&self) {
        self.shared.close();
    }
}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl<T> Drop for Consumer<T> {
    fn drop(&mut self) {
        self.shared.close();
    }
}
