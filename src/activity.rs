use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Last-activity timestamp shared by a connection and every transaction it
/// hands out.
#[derive(Debug)]
pub(crate) struct Activity {
   last: Mutex<Instant>,
}

impl Activity {
   pub(crate) fn new() -> Self {
      Self {
         last: Mutex::new(Instant::now()),
      }
   }

   /// Record activity now.
   pub(crate) fn touch(&self) {
      *self.last.lock() = Instant::now();
   }

   pub(crate) fn idle(&self) -> Duration {
      self.last.lock().elapsed()
   }
}
