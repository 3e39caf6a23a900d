//! 집계 가드: try-lock + 백오프
//!
//! 삽입 경로와 만료 스레드가 해시 테이블 상태를 공유할 때 쓰는 상호 배제입니다.
//! 블로킹 대기 대신 `try_lock`을 반복하며, 재시도 사이의 대기 시간은
//! `retry_interval`로 제한됩니다.
//!
//! ```text
//! attempt 1..=SPIN_ATTEMPTS      spin_loop hint
//! attempt ..=YIELD_ATTEMPTS      thread::yield_now
//! 이후                           thread::sleep(retry_interval)
//! ```
//!
//! 가드는 RAII이므로 조기 반환이나 에러 경로에서도 항상 해제됩니다.

use std::time::Duration;

use metrics::counter;
use tokio::sync::{Mutex, MutexGuard};

use flowpost_core::metrics as m;

const SPIN_ATTEMPTS: u32 = 64;
const YIELD_ATTEMPTS: u32 = 128;

/// 기본 재시도 간격
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// try-lock 기반 스핀 가드
#[derive(Debug)]
pub struct SpinGuard<T> {
    inner: Mutex<T>,
    retry_interval: Duration,
}

impl<T> SpinGuard<T> {
    /// 새 가드를 생성합니다.
    pub fn new(value: T, retry_interval: Duration) -> Self {
        Self {
            inner: Mutex::new(value),
            retry_interval,
        }
    }

    /// 가드를 획득할 때까지 재시도합니다.
    pub fn acquire(&self) -> MutexGuard<'_, T> {
        let mut attempts = 0u32;
        loop {
            if let Ok(guard) = self.inner.try_lock() {
                if attempts > 0 {
                    counter!(m::AGGREGATOR_GUARD_CONTENTION_TOTAL).increment(1);
                }
                return guard;
            }
            attempts = attempts.saturating_add(1);
            if attempts <= SPIN_ATTEMPTS {
                std::hint::spin_loop();
            } else if attempts <= YIELD_ATTEMPTS {
                std::thread::yield_now();
            } else {
                std::thread::sleep(self.retry_interval);
            }
        }
    }

    /// 한 번만 시도합니다.
    #[cfg(test)]
    pub(crate) fn try_acquire(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock().ok()
    }

    /// 배타 소유 시 잠금 없이 접근합니다.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn acquire_is_exclusive() {
        let guard = SpinGuard::new(0u32, Duration::from_millis(1));
        let held = guard.acquire();
        assert!(guard.try_acquire().is_none());
        drop(held);
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn waiters_eventually_acquire() {
        let guard = Arc::new(SpinGuard::new(0u64, Duration::from_millis(1)));
        let done = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        *guard.acquire() += 1;
                    }
                    done.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(*guard.acquire(), 4000);
    }

    #[test]
    fn guard_released_on_early_return() {
        fn bail(guard: &SpinGuard<Vec<u8>>) -> Result<(), &'static str> {
            let mut state = guard.acquire();
            state.push(1);
            if state.len() == 1 {
                return Err("early");
            }
            state.push(2);
            Ok(())
        }

        let guard = SpinGuard::new(Vec::new(), Duration::from_millis(1));
        assert!(bail(&guard).is_err());
        let state = guard.try_acquire().expect("guard must be free after early return");
        assert_eq!(*state, vec![1]);
    }
}
