use super::condvar::ConditionVariable;
use super::lock::Lock;
use crate::Kernel;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Exchange {
    /// Word published by a speaker and not yet taken by a listener.
    slot: Option<i32>,
    speaking: usize,
    listening: usize,
    /// Words published so far; a speaker's ticket is its word's number.
    published: u64,
    /// Words taken so far.
    consumed: u64,
}

/// Synchronous rendezvous: every `speak` is matched with exactly one
/// `listen`, and neither returns before the word has changed hands.
pub struct Communicator {
    lock: Arc<Lock>,
    speakers: ConditionVariable,
    listeners: ConditionVariable,
    // Only touched by the holder of `lock`.
    exchange: spin::Mutex<Exchange>,
}

impl Communicator {
    pub fn new(kernel: &Kernel) -> Self {
        let lock = Arc::new(Lock::new(kernel));
        Self {
            speakers: ConditionVariable::new(Arc::clone(&lock)),
            listeners: ConditionVariable::new(Arc::clone(&lock)),
            lock,
            exchange: spin::Mutex::new(Exchange::default()),
        }
    }

    /// Hand `word` to a listener. Returns once a listener has taken it.
    pub fn speak(&self, word: i32) {
        self.lock.acquire();
        self.exchange.lock().speaking += 1;

        while self.exchange.lock().slot.is_some() {
            self.speakers.wait();
        }
        let ticket = {
            let mut exchange = self.exchange.lock();
            exchange.slot = Some(word);
            exchange.published += 1;
            exchange.published
        };
        self.listeners.notify_one();

        while self.exchange.lock().consumed < ticket {
            self.speakers.wait();
        }
        self.exchange.lock().speaking -= 1;
        self.lock.release();
    }

    /// Wait for a speaker and return its word.
    pub fn listen(&self) -> i32 {
        self.lock.acquire();
        self.exchange.lock().listening += 1;

        let word = loop {
            let taken = {
                let mut exchange = self.exchange.lock();
                let taken = exchange.slot.take();
                if taken.is_some() {
                    exchange.consumed += 1;
                    exchange.listening -= 1;
                }
                taken
            };
            match taken {
                Some(word) => break word,
                None => self.listeners.wait(),
            }
        };

        // Both the speaker of this word and speakers waiting for the slot
        // wait on `speakers`.
        self.speakers.notify_all();
        self.lock.release();
        word
    }

    /// Speakers inside `speak`.
    pub fn pending_speakers(&self) -> usize {
        self.exchange.lock().speaking
    }

    /// Listeners still waiting for a word.
    pub fn pending_listeners(&self) -> usize {
        self.exchange.lock().listening
    }
}
