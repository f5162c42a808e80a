use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,

    #[error("unrecognized input near offset {0}")]
    Lex(usize),

    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unmatched '('")]
    UnclosedParen,

    #[error("unknown identifier '{0}'")]
    UnknownIdent(String),
}
