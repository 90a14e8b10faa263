//! Rendezvous between the interrupt callbacks and the waiting driver.

use core::future::poll_fn;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::Poll;

use embassy_futures::select::{select, Either};
use embassy_sync::waitqueue::AtomicWaker;
use embedded_hal::delay::DelayNs;
use embedded_hal_async::delay::DelayNs as AsyncDelayNs;

use crate::error::Timeout;

/// One-shot completion flag, raised from interrupt context.
pub struct Completion {
    done: AtomicBool,
    waker: AtomicWaker,
}

impl Completion {
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            waker: AtomicWaker::new(),
        }
    }

    /// Drop any signal left over from an earlier operation. Must be called
    /// before the hardware is triggered.
    pub fn arm(&self) {
        self.done.store(false, Ordering::Release);
    }

    /// Raise the flag and wake the task waiting on it, if any
    pub fn signal(&self) {
        self.done.store(true, Ordering::Release);
        self.waker.wake();
    }

    pub fn is_signaled(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn take(&self) -> bool {
        self.done.swap(false, Ordering::AcqRel)
    }

    /// Block until signaled, for at most `timeout_us`, checking every `tick_us`
    pub fn wait<D: DelayNs>(
        &self,
        delay: &mut D,
        timeout_us: u32,
        tick_us: u32,
    ) -> Result<(), Timeout> {
        let tick_us = tick_us.max(1);
        for _ in 0..timeout_us / tick_us {
            if self.take() {
                return Ok(());
            }
            delay.delay_us(tick_us);
        }
        if self.take() {
            return Ok(());
        }
        Err(Timeout)
    }

    /// Wait until signaled or until `timeout_us` has passed on `delay`.
    ///
    /// The task sleeps in between, [`Self::signal`] wakes it.
    pub async fn wait_async<D: AsyncDelayNs>(
        &self,
        delay: &mut D,
        timeout_us: u32,
    ) -> Result<(), Timeout> {
        let signaled = poll_fn(|cx| {
            self.waker.register(cx.waker());
            if self.take() {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        });

        match select(signaled, delay.delay_us(timeout_us)).await {
            Either::First(()) => Ok(()),
            // The interrupt may land together with the deadline
            Either::Second(()) if self.take() => Ok(()),
            Either::Second(()) => Err(Timeout),
        }
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}
