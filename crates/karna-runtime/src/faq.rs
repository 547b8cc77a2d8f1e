//! Canned answers to common delivery questions.
//!
//! A spoken question is matched against the known questions with the
//! Ratcliff/Obershelp similarity ratio; the best match at or above
//! [`DEFAULT_CUTOFF`] answers locally, anything else goes to the language
//! model.

/// Minimum similarity for a question to count as a match.
pub const DEFAULT_CUTOFF: f64 = 0.7;

const DELIVERY_FAQ: &[(&str, &str)] = &[
    ("who are you?", "I'm delivery robot, name Karna"),
    (
        "can i change my delivery location?",
        "Yes, but only before the robot reaches your vicinity. Please update your address in the app.",
    ),
    (
        "can i schedule my delivery for a later time?",
        "Yes, you can select a preferred delivery time in the app before dispatch.",
    ),
    (
        "can i track my order in real-time?",
        "Yes, use the tracking feature in our app to monitor the live location of your delivery.",
    ),
    (
        "how do i open the delivery compartment?",
        "Enter the OTP sent to your registered phone or use Face Recognition if enabled.",
    ),
    (
        "i didn't receive my otp. what should i do?",
        "Please check your phone/email. If the issue persists, request a new OTP in the app.",
    ),
    (
        "can someone else collect my package?",
        "Yes, they will need to enter the OTP or verify using Face Recognition.",
    ),
    (
        "what if someone tries to steal my package?",
        "The compartment is locked and only opens for authorized users. Security alerts are triggered for unauthorized access.",
    ),
    (
        "can i pay on delivery?",
        "Currently, only pre-paid orders are supported for autonomous deliveries.",
    ),
    (
        "can i cancel my order after dispatch?",
        "Cancellations after dispatch are not allowed. You can refuse delivery upon arrival.",
    ),
    (
        "can i change the payment method?",
        "Payment methods cannot be changed once the order is dispatched.",
    ),
    (
        "what happens if the robot breaks down?",
        "If the robot malfunctions, support will arrange for an alternative delivery or refund.",
    ),
    (
        "what if the robot gets stuck?",
        "The robot will attempt to reroute or request assistance from a nearby operator.",
    ),
    (
        "can i interact with the robot using voice?",
        "Yes, the robot supports basic voice commands for queries and assistance.",
    ),
    (
        "how does the robot handle traffic and obstacles?",
        "It uses AI-powered sensors to navigate around obstacles and adjust routes dynamically.",
    ),
    (
        "is the delivery compartment sanitized?",
        "Yes, our robots use UV-C sterilization to ensure hygiene before and after each delivery.",
    ),
    (
        "can the robot handle multiple deliveries at once?",
        "Yes, the robot carries multiple packages in separate compartments and delivers them sequentially.",
    ),
];

#[derive(Debug, Clone)]
pub struct FaqTable {
    entries: Vec<(String, String)>,
    cutoff: f64,
}

impl FaqTable {
    /// Questions must be lower case; queries are lower-cased before
    /// matching.
    pub fn new(entries: Vec<(String, String)>, cutoff: f64) -> Self {
        Self { entries, cutoff }
    }

    /// The built-in delivery questions.
    pub fn delivery() -> Self {
        let entries = DELIVERY_FAQ
            .iter()
            .map(|(q, a)| (q.to_string(), a.to_string()))
            .collect();
        Self::new(entries, DEFAULT_CUTOFF)
    }

    /// Answer for the closest known question, if any is close enough.
    pub fn lookup(&self, query: &str) -> Option<&str> {
        let query = query.trim().to_lowercase();
        let mut best: Option<(f64, &str)> = None;
        for (question, answer) in &self.entries {
            let score = similarity(&query, question);
            if score >= self.cutoff && best.is_none_or(|(top, _)| score > top) {
                best = Some((score, answer));
            }
        }
        best.map(|(_, answer)| answer)
    }
}

/// Ratcliff/Obershelp similarity of `a` and `b`: twice the number of
/// matching characters divided by the total length. `1.0` for two empty
/// strings.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

/// Characters covered by the longest common block, plus (recursively) the
/// matches to its left and to its right.
fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (i, j, len) = longest_common_block(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..i], &b[..j]) + matching_chars(&a[i + len..], &b[j + len..])
}

/// Earliest longest common substring as `(start_in_a, start_in_b, len)`.
fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    // prev[j + 1] = length of the common run ending at a[i - 1], b[j].
    let mut prev = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        let mut row = vec![0usize; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            if ca == cb {
                let run = prev[j] + 1;
                row[j + 1] = run;
                if run > best.2 {
                    best = (i + 1 - run, j + 1 - run, run);
                }
            }
        }
        prev = row;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_matches_reference_ratios() {
        assert_eq!(similarity("abcd", "bcde"), 0.75);
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", ""), 0.0);
        assert_eq!(similarity("karna", "karna"), 1.0);
    }

    #[test]
    fn recursion_counts_blocks_on_both_sides() {
        // "ab" and "yz" match around the shared "XX".
        assert_eq!(similarity("abXXyz", "abQXXyz"), 2.0 * 6.0 / 13.0);
    }

    #[test]
    fn exact_question_is_answered() {
        let faq = FaqTable::delivery();
        assert_eq!(faq.lookup("Who are you?"), Some("I'm delivery robot, name Karna"));
    }

    #[test]
    fn near_miss_from_speech_recognition_still_matches() {
        let faq = FaqTable::delivery();
        let answer = faq.lookup("can i pay on delivery").unwrap();
        assert!(answer.starts_with("Currently, only pre-paid orders"));
    }

    #[test]
    fn unrelated_question_falls_through() {
        let faq = FaqTable::delivery();
        assert_eq!(faq.lookup("what is the weather in bangalore today"), None);
    }

    #[test]
    fn best_of_several_candidates_wins() {
        let faq = FaqTable::new(
            vec![
                ("open the door".into(), "first".into()),
                ("open the doors".into(), "second".into()),
            ],
            0.5,
        );
        assert_eq!(faq.lookup("open the doors"), Some("second"));
    }
}
