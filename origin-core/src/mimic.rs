//! Mimic text transform and pending reply bookkeeping.

use crate::notify::ChatKind;
use rand::Rng;
use std::collections::HashMap;
use std::ops::Range;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Re-case a message with alternating case by character position.
///
/// Position 0 is upper case, 1 lower, 2 upper and so on. Every character
/// counts toward the position, including spaces and punctuation. Each
/// character maps to exactly one character, so the length never changes.
pub fn format_message(message: &str) -> String {
    message
        .chars()
        .enumerate()
        .map(|(i, ch)| {
            let lower = single(ch.to_lowercase()).unwrap_or(ch);
            if i % 2 == 0 {
                single(lower.to_uppercase()).unwrap_or(lower)
            } else {
                lower
            }
        })
        .collect()
}

/// The only char of a case mapping, if it has exactly one.
fn single(mut mapped: impl Iterator<Item = char>) -> Option<char> {
    let first = mapped.next()?;
    mapped.next().is_none().then_some(first)
}

/// Draw a reply delay uniformly from `range`.
pub fn sample_delay<R: Rng>(range: &Range<Duration>, rng: &mut R) -> Duration {
    if range.start >= range.end {
        return range.start;
    }
    rng.gen_range(range.clone())
}

/// Cancellation tokens for replies waiting out their delay, keyed by
/// (target, kind).
#[derive(Debug, Default)]
pub struct PendingReplies {
    tokens: Mutex<HashMap<(String, ChatKind), CancellationToken>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a new reply. Replies sharing a key share a token.
    pub async fn token(&self, target: &str, kind: ChatKind) -> CancellationToken {
        let mut tokens = self.tokens.lock().await;
        let token = tokens
            .entry((target.to_string(), kind))
            .or_insert_with(CancellationToken::new);
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }

    /// Cancel every pending reply. Returns how many keys were cancelled.
    pub async fn cancel_all(&self) -> usize {
        let mut tokens = self.tokens.lock().await;
        let count = tokens.len();
        for (_, token) in tokens.drain() {
            token.cancel();
        }
        count
    }

    /// Cancel pending replies for every target except `keep`.
    pub async fn cancel_except(&self, keep: &str) {
        let mut tokens = self.tokens.lock().await;
        tokens.retain(|(target, _), token| {
            if target == keep {
                true
            } else {
                token.cancel();
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_format_message_example() {
        assert_eq!(format_message("Hello There"), "HeLlO ThErE");
    }

    #[test]
    fn test_format_counts_every_character() {
        assert_eq!(format_message("a b!c"), "A B!C");
        assert_eq!(format_message("SHOUTING"), "ShOuTiNg");
        assert_eq!(format_message(""), "");
    }

    #[test]
    fn test_format_preserves_length_and_symbols() {
        for input in ["hi, 123 ... ok?", "straße", "ß", "aİb", "ﬁx", "ŉ Ǆ"] {
            let out = format_message(input);
            assert_eq!(out.chars().count(), input.chars().count(), "{input:?}");
            for (a, b) in input.chars().zip(out.chars()) {
                if !a.is_alphabetic() {
                    assert_eq!(a, b);
                }
            }
        }
    }

    #[test]
    fn test_format_keeps_multi_char_mappings_as_is() {
        assert_eq!(format_message("ß"), "ß");
        assert_eq!(format_message("straße"), "StRaße");
        assert_eq!(format_message("ﬁx"), "ﬁx");
        assert_eq!(format_message("éÀ"), "Éà");
    }

    #[test]
    fn test_format_second_pass_is_stable() {
        let symbols = "12 :) ##";
        assert_eq!(format_message(&format_message(symbols)), symbols);
        let formatted = format_message("abc");
        assert_eq!(format_message(&formatted), formatted);
        assert_ne!(formatted, "abc");
    }

    #[test]
    fn test_sample_delay_in_range() {
        let range = Duration::from_millis(500)..Duration::from_millis(1500);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let delay = sample_delay(&range, &mut rng);
            assert!(range.contains(&delay));
        }
    }

    #[test]
    fn test_sample_delay_empty_range() {
        let range = Duration::from_millis(10)..Duration::from_millis(10);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(sample_delay(&range, &mut rng), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_cancel_all_cancels_tokens() {
        let pending = PendingReplies::new();
        let a = pending.token("bob", ChatKind::Chat).await;
        let b = pending.token("bob", ChatKind::Chat).await;
        let c = pending.token("bob", ChatKind::Shout).await;

        assert_eq!(pending.cancel_all().await, 2);
        assert!(a.is_cancelled() && b.is_cancelled() && c.is_cancelled());

        let fresh = pending.token("bob", ChatKind::Chat).await;
        assert!(!fresh.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_except_keeps_target() {
        let pending = PendingReplies::new();
        let bob = pending.token("bob", ChatKind::Chat).await;
        let alice = pending.token("alice", ChatKind::Whisper).await;

        pending.cancel_except("alice").await;
        assert!(bob.is_cancelled());
        assert!(!alice.is_cancelled());
    }
}
