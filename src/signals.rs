use std::collections::HashSet;

/// Hype phrases that mark a message as chasing momentum. A candidate
/// extracted from such a message gets the stricter price ceiling.
const NEGATIVE_WORDS: &[&str] = &[
    "tenbagger",
    "chased",
    "on volume",
    "custo play",
    "custodian",
    "new high",
    "new highs",
    "hod",
    "boom",
    "booom",
    "boooom",
    "booooom",
    "boooooom",
    "high of",
];

/// One candidate instrument extracted from a free-text message.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalCandidate {
    pub symbol: String,
    pub negative_bias: bool,
}

/// Extract candidate symbols from a free-text message.
///
/// Candidates are `$`-prefixed tokens or bare all-caps words; each appears
/// once regardless of repetition. `negative_bias` is set for every
/// candidate when the message contains hype language anywhere.
pub fn parse_message(text: &str) -> Vec<SignalCandidate> {
    let lower = text.to_lowercase();
    let negative_bias = NEGATIVE_WORDS.iter().any(|w| lower.contains(w));

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for raw in text.split_whitespace() {
        let token = raw.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '$');
        if let Some(symbol) = candidate_symbol(token) {
            if seen.insert(symbol.clone()) {
                candidates.push(SignalCandidate {
                    symbol,
                    negative_bias,
                });
            }
        }
    }

    candidates
}

fn candidate_symbol(token: &str) -> Option<String> {
    if let Some(body) = token.strip_prefix('$') {
        // cashtags are explicit; accept any case
        if (1..=5).contains(&body.len()) && body.chars().all(|c| c.is_ascii_alphabetic()) {
            return Some(body.to_ascii_uppercase());
        }
        return None;
    }

    // bare tokens must shout to count; single letters are too noisy
    if (2..=5).contains(&token.len()) && token.chars().all(|c| c.is_ascii_uppercase()) {
        return Some(token.to_string());
    }
    None
}
