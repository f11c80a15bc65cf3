//! Lexicon-based polarity scoring used to pick the tone of automated replies.
//!
//! The classifier is deliberately binary: a compound score above the positive
//! threshold is `Positive`, everything else (including neutral text and empty
//! input) is `Negative`. A true neutral bucket is never produced; downstream
//! reply selection depends on this two-way split, so the collapse is kept
//! rather than fixed.

/// Compound score above which text is considered positive.
const POSITIVE_THRESHOLD: f64 = 0.25;

/// Normalization constant for the compound score (maps the raw valence sum
/// into [-1, 1]).
const NORMALIZATION_ALPHA: f64 = 15.0;

/// Dampened, sign-flipped contribution of a negated term.
const NEGATION_FACTOR: f64 = -0.74;

/// Valence adjustment contributed by an intensifier on the following term.
const INTENSIFIER_BOOST: f64 = 0.293;

/// Per-exclamation-mark emphasis, capped at four marks.
const EXCLAMATION_BOOST: f64 = 0.292;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentiment {
    Positive,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
        }
    }
}

/// Classify text by its compound polarity score.
pub fn classify(text: &str) -> Sentiment {
    if compound_score(text) > POSITIVE_THRESHOLD {
        Sentiment::Positive
    } else {
        Sentiment::Negative
    }
}

/// Compound polarity score in [-1, 1]. Zero for empty or unscored text.
pub fn compound_score(text: &str) -> f64 {
    let tokens: Vec<String> = text
        .split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect();

    let mut sum = 0.0;
    for (i, token) in tokens.iter().enumerate() {
        let Some(mut valence) = lexicon_valence(token) else {
            continue;
        };
        if i > 0 && is_intensifier(&tokens[i - 1]) {
            valence += INTENSIFIER_BOOST * valence.signum();
        }
        if preceded_by_negation(&tokens, i) {
            valence *= NEGATION_FACTOR;
        }
        sum += valence;
    }

    if sum != 0.0 {
        let bangs = text.chars().filter(|&c| c == '!').count().min(4);
        sum += bangs as f64 * EXCLAMATION_BOOST * sum.signum();
    }

    sum / (sum * sum + NORMALIZATION_ALPHA).sqrt()
}

/// Look back up to two tokens for a negation word.
fn preceded_by_negation(tokens: &[String], i: usize) -> bool {
    tokens[i.saturating_sub(2)..i]
        .iter()
        .any(|t| is_negation(t))
}

fn is_negation(token: &str) -> bool {
    matches!(
        token,
        "not" | "no" | "never" | "neither" | "nor" | "cannot"
            | "don't" | "doesn't" | "didn't" | "can't" | "won't" | "wouldn't"
            | "isn't" | "wasn't" | "aren't" | "weren't" | "shouldn't" | "couldn't"
    )
}

fn is_intensifier(token: &str) -> bool {
    matches!(
        token,
        "very" | "really" | "so" | "extremely" | "absolutely" | "totally"
            | "incredibly" | "super" | "completely" | "utterly"
    )
}

fn lexicon_valence(token: &str) -> Option<f64> {
    LEXICON
        .iter()
        .find(|(word, _)| *word == token)
        .map(|(_, v)| *v)
}

/// Compact valence lexicon covering the vocabulary of short social messages.
/// Values follow the usual [-4, 4] convention for word-level ratings.
static LEXICON: &[(&str, f64)] = &[
    // positive
    ("love", 3.2),
    ("loved", 3.0),
    ("amazing", 2.8),
    ("awesome", 3.1),
    ("great", 3.1),
    ("good", 1.9),
    ("excellent", 2.7),
    ("fantastic", 2.6),
    ("wonderful", 2.7),
    ("perfect", 2.7),
    ("best", 3.2),
    ("happy", 2.7),
    ("glad", 2.0),
    ("thanks", 1.9),
    ("thank", 1.9),
    ("nice", 1.8),
    ("helpful", 1.8),
    ("appreciate", 2.0),
    ("excited", 2.3),
    ("beautiful", 2.9),
    ("fun", 2.3),
    ("cool", 1.3),
    ("impressive", 2.3),
    ("recommend", 1.7),
    ("works", 1.2),
    ("fast", 1.1),
    ("easy", 1.5),
    ("enjoy", 2.2),
    ("enjoyed", 2.2),
    ("like", 1.5),
    ("liked", 1.6),
    ("win", 2.4),
    ("wow", 2.1),
    // negative
    ("terrible", -2.1),
    ("worst", -3.1),
    ("bad", -2.5),
    ("awful", -2.0),
    ("horrible", -2.5),
    ("hate", -2.7),
    ("hated", -2.6),
    ("disappointed", -2.0),
    ("disappointing", -2.2),
    ("broken", -1.8),
    ("poor", -2.1),
    ("useless", -1.8),
    ("angry", -2.3),
    ("annoying", -1.8),
    ("slow", -1.2),
    ("problem", -1.7),
    ("problems", -1.7),
    ("issue", -1.2),
    ("issues", -1.3),
    ("scam", -2.6),
    ("waste", -1.8),
    ("wrong", -2.1),
    ("sad", -2.1),
    ("unhappy", -1.9),
    ("fail", -2.3),
    ("failed", -2.3),
    ("refund", -0.9),
    ("confusing", -1.4),
    ("ugly", -2.3),
    ("boring", -1.3),
    ("crash", -1.6),
    ("crashes", -1.6),
    ("bug", -1.3),
    ("bugs", -1.4),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_text() {
        assert_eq!(classify("I love this, amazing!"), Sentiment::Positive);
    }

    #[test]
    fn test_empty_text_is_negative() {
        assert_eq!(classify(""), Sentiment::Negative);
        assert_eq!(compound_score(""), 0.0);
    }

    #[test]
    fn test_negative_text() {
        assert_eq!(classify("terrible, worst ever"), Sentiment::Negative);
    }

    #[test]
    fn test_neutral_text_collapses_to_negative() {
        // No neutral bucket: unscored text lands below the threshold
        assert_eq!(classify("the package arrived on tuesday"), Sentiment::Negative);
    }

    #[test]
    fn test_score_bounds() {
        let very_positive = "love love love amazing awesome great best wonderful!!!";
        let very_negative = "hate hate terrible worst awful horrible bad";
        assert!(compound_score(very_positive) <= 1.0);
        assert!(compound_score(very_negative) >= -1.0);
        assert!(compound_score(very_positive) > 0.5);
        assert!(compound_score(very_negative) < -0.5);
    }

    #[test]
    fn test_negation_flips_valence() {
        let plain = compound_score("this is good");
        let negated = compound_score("this is not good");
        assert!(plain > 0.0);
        assert!(negated < 0.0);
    }

    #[test]
    fn test_intensifier_boosts_score() {
        let plain = compound_score("this is good");
        let boosted = compound_score("this is really good");
        assert!(boosted > plain);
    }

    #[test]
    fn test_exclamations_amplify() {
        let calm = compound_score("this is great");
        let loud = compound_score("this is great!!!");
        assert!(loud > calm);
    }

    #[test]
    fn test_threshold_is_strict() {
        // Classification requires the score to exceed the threshold, not meet it
        assert!(compound_score("the package arrived on tuesday") <= POSITIVE_THRESHOLD);
        assert_eq!(classify("the package arrived on tuesday"), Sentiment::Negative);
    }

    #[test]
    fn test_punctuation_stripped_from_tokens() {
        assert_eq!(classify("love, this. amazing!"), Sentiment::Positive);
    }
}
