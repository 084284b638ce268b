pub mod stopword;
pub mod tokenizer;
pub mod mail_tokenizer;

pub use mail_tokenizer::MailTokenizer;
pub use stopword::StopWords;
pub use tokenizer::{MessageContext, Tokenizer};
