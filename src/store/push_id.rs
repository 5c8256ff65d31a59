//! Generated record keys.
//!
//! Keys are 20 characters drawn from an alphabet whose ASCII order matches
//! its symbol order: 8 characters of millisecond timestamp followed by 12
//! characters of entropy. Keys generated by one generator sort strictly in
//! creation order, even within the same millisecond.

use uuid::Uuid;

use crate::time::EpochMillis;

const ALPHABET: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const TIME_CHARS: usize = 8;
const RANDOM_CHARS: usize = 12;

/// Length of every generated key.
pub const PUSH_ID_LEN: usize = TIME_CHARS + RANDOM_CHARS;

/// Stateful key generator. Not shared: each store worker owns one.
#[derive(Debug, Default)]
pub struct PushIdGenerator {
    last_millis: Option<i64>,
    last_random: [u8; RANDOM_CHARS],
}

impl PushIdGenerator {
    /// Creates a generator with no history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates the next key for time `now`.
    pub fn next_id(&mut self, now: EpochMillis) -> String {
        let millis = now.as_i64().max(0);
        // A clock that steps backwards keeps the previous time so ordering holds.
        let millis = match self.last_millis {
            Some(last) if millis < last => last,
            _ => millis,
        };

        if self.last_millis == Some(millis) {
            if !increment(&mut self.last_random) {
                // All entropy digits overflowed; borrow the next millisecond.
                return self.next_id(EpochMillis::new(millis.saturating_add(1)));
            }
        } else {
            self.last_random = fresh_random();
        }
        self.last_millis = Some(millis);

        let mut out = Vec::with_capacity(PUSH_ID_LEN);
        let mut time_chars = [0u8; TIME_CHARS];
        let mut remaining = millis;
        for slot in time_chars.iter_mut().rev() {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let digit = (remaining % 64) as usize;
            *slot = ALPHABET[digit];
            remaining /= 64;
        }
        out.extend_from_slice(&time_chars);
        out.extend(self.last_random.iter().map(|&d| ALPHABET[usize::from(d)]));

        String::from_utf8(out).unwrap_or_default()
    }
}

fn fresh_random() -> [u8; RANDOM_CHARS] {
    let bytes = Uuid::new_v4().into_bytes();
    let mut out = [0u8; RANDOM_CHARS];
    for (slot, byte) in out.iter_mut().zip(bytes.iter()) {
        *slot = byte % 64;
    }
    out
}

/// Adds one to a base-64 digit string; false on full overflow.
fn increment(digits: &mut [u8; RANDOM_CHARS]) -> bool {
    for digit in digits.iter_mut().rev() {
        if *digit < 63 {
            *digit += 1;
            return true;
        }
        *digit = 0;
    }
    false
}
