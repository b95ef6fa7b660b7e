use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use serde::Serialize;

/// Parameters of an `<eval .../>` marker, attached to the code block that follows it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalDirective {
    pub params: BTreeMap<String, String>,
    /// 1-based line of the marker.
    pub line: usize,
    /// Byte span of the marker line.
    #[serde(skip)]
    pub span: Range<usize>,
}

impl EvalDirective {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The block identifier. Blank names count as missing.
    pub fn name(&self) -> Option<&str> {
        self.get("name").map(str::trim).filter(|name| !name.is_empty())
    }

    pub fn results(&self) -> ResultsSpec {
        ResultsSpec::parse(self.get("results").unwrap_or(""))
    }
}

/// Where captured output goes relative to earlier results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    #[default]
    Replace,
    Append,
    Prepend,
    /// Leave the document alone.
    None,
    /// Leave the document alone and keep output off the terminal.
    Silent,
}

impl Placement {
    pub fn writes_document(self) -> bool {
        matches!(self, Placement::Replace | Placement::Append | Placement::Prepend)
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "replace" => Some(Placement::Replace),
            "append" => Some(Placement::Append),
            "prepend" => Some(Placement::Prepend),
            "none" => Some(Placement::None),
            "silent" => Some(Placement::Silent),
            _ => None,
        }
    }
}

/// How captured output is rendered into markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultFormat {
    #[default]
    Code,
    Table,
    List,
    Raw,
    File,
    Html,
    Verbatim,
}

impl ResultFormat {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "code" => Some(ResultFormat::Code),
            "table" => Some(ResultFormat::Table),
            "list" => Some(ResultFormat::List),
            "raw" => Some(ResultFormat::Raw),
            "file" => Some(ResultFormat::File),
            "html" => Some(ResultFormat::Html),
            "verbatim" => Some(ResultFormat::Verbatim),
            _ => None,
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Placement::Replace => "replace",
            Placement::Append => "append",
            Placement::Prepend => "prepend",
            Placement::None => "none",
            Placement::Silent => "silent",
        };
        f.write_str(s)
    }
}

impl fmt::Display for ResultFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultFormat::Code => "code",
            ResultFormat::Table => "table",
            ResultFormat::List => "list",
            ResultFormat::Raw => "raw",
            ResultFormat::File => "file",
            ResultFormat::Html => "html",
            ResultFormat::Verbatim => "verbatim",
        };
        f.write_str(s)
    }
}

/// The parsed `results` parameter: one placement and one format token,
/// space-separated, in any order. A later token of the same kind wins.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultsSpec {
    pub placement: Placement,
    pub format: ResultFormat,
    /// Tokens that are neither a placement nor a format.
    pub unknown: Vec<String>,
}

impl ResultsSpec {
    pub fn parse(value: &str) -> Self {
        let mut spec = ResultsSpec::default();
        for token in value.split_whitespace() {
            let token = token.to_ascii_lowercase();
            if let Some(placement) = Placement::from_token(&token) {
                spec.placement = placement;
            } else if let Some(format) = ResultFormat::from_token(&token) {
                spec.format = format;
            } else {
                spec.unknown.push(token);
            }
        }
        spec
    }
}
