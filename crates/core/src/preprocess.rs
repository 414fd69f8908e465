use crate::error::IngestError;
use regex::Regex;

// English function words minus the negations (no, nor, not and the n't forms).
const STOPWORDS: [&str; 139] = [
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any",
    "are", "as", "at", "be", "because", "been", "before", "being", "below", "between",
    "both", "but", "by", "can", "d", "did", "do", "does", "doing", "down", "during", "each",
    "few", "for", "from", "further", "had", "has", "have", "having", "he", "her", "here",
    "hers", "herself", "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it",
    "it's", "its", "itself", "just", "ll", "m", "ma", "me", "more", "most", "my", "myself",
    "now", "o", "of", "off", "on", "once", "only", "or", "other", "our", "ours",
    "ourselves", "out", "over", "own", "re", "s", "same", "she", "she's", "should",
    "should've", "so", "some", "such", "t", "than", "that", "that'll", "the", "their",
    "theirs", "them", "themselves", "then", "there", "these", "they", "this", "those",
    "through", "to", "too", "under", "until", "up", "ve", "very", "was", "we", "were",
    "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with", "y",
    "you", "you'd", "you'll", "you're", "you've", "your", "yours", "yourself", "yourselves",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessOptions {
    pub lowercase: bool,
    pub remove_stopwords: bool,
    pub token_pattern: &'static str,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            lowercase: true,
            remove_stopwords: true,
            token_pattern: r"[\p{L}\p{N}]+(?:['’.\-][\p{L}\p{N}]+)*",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextPreprocessor {
    token_re: Regex,
    options: PreprocessOptions,
}

impl TextPreprocessor {
    pub fn new(options: PreprocessOptions) -> Result<Self, IngestError> {
        Ok(Self {
            token_re: Regex::new(options.token_pattern)?,
            options,
        })
    }

    pub fn options(&self) -> &PreprocessOptions {
        &self.options
    }

    pub fn normalize(&self, text: &str) -> String {
        let mut tokens = Vec::new();
        let mut last_end = 0;
        for found in self.token_re.find_iter(text) {
            let original = found.as_str();
            let sentence_start =
                last_end == 0 || text[last_end..found.start()].contains(&['.', '?', '!', '\n'][..]);
            last_end = found.end();

            if self.options.remove_stopwords
                && !is_proper(original, sentence_start)
                && is_stopword(original)
            {
                continue;
            }

            tokens.push(if self.options.lowercase {
                original.to_lowercase()
            } else {
                original.to_string()
            });
        }
        tokens.join(" ")
    }
}

// Acronyms anywhere, capitalized words anywhere but the start of a sentence.
fn is_proper(token: &str, sentence_start: bool) -> bool {
    let letters: Vec<char> = token.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < 2 || !letters[0].is_uppercase() {
        return false;
    }
    letters.iter().all(|c| c.is_uppercase()) || !sentence_start
}

fn is_stopword(token: &str) -> bool {
    let folded = token.to_lowercase().replace('\u{2019}', "'");
    STOPWORDS.binary_search(&folded.as_str()).is_ok()
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
