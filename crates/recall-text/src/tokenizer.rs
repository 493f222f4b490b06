use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer, TokenStream};

/// Tokens with fewer characters than this are dropped.
pub const MIN_TOKEN_CHARS: usize = 3;

pub const STOP_WORDS: &[&str] = &[
    "a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
    "all","any","both","each","few","more","most","other","some","such","nor","only","own","same","too","very","just","also","about","above","below","into","over","under","again","once","here","been","being","were","you","your","yours","his","her","hers","him","she","our","ours","out","off","until","while","during","before","after","because","between","through",
];

/// Pure text → token function used for both indexing and querying.
///
/// Lowercases, splits on every non-alphanumeric character, drops stop words
/// and tokens shorter than [`MIN_TOKEN_CHARS`].
#[derive(Clone)]
pub struct Tokenizer {
    analyzer: TextAnalyzer,
}

impl Tokenizer {
    pub fn new() -> Self {
        let analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(LowerCaser)
            .filter(StopWordFilter::remove(STOP_WORDS.iter().map(|s| s.to_string())))
            .build();
        Self { analyzer }
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        // token_stream needs &mut; a clone keeps `tokenize` callable from shared references
        let mut analyzer = self.analyzer.clone();
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            let token = &stream.token().text;
            if token.chars().count() >= MIN_TOKEN_CHARS { tokens.push(token.clone()); }
        }
        tokens
    }
}

impl Default for Tokenizer {
    fn default() -> Self { Self::new() }
}
