use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_OPEN_DELIMITER: &str = "{{";
pub const DEFAULT_CLOSE_DELIMITER: &str = "}}";

/// Default cap on nested block actions
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 512;

/// Functions predefined by Go's `text/template`
pub const BUILTIN_FUNCTIONS: &[(&str, &str)] = &[
    ("and", "Returns the boolean AND of its arguments by returning the first empty argument or the last argument."),
    ("call", "Returns the result of calling the first argument, which must be a function, with the remaining arguments as parameters."),
    ("html", "Returns the escaped HTML equivalent of the textual representation of its arguments."),
    ("index", "Returns the result of indexing its first argument by the following arguments."),
    ("slice", "Returns the result of slicing its first argument by the remaining arguments."),
    ("js", "Returns the escaped JavaScript equivalent of the textual representation of its arguments."),
    ("len", "Returns the integer length of its argument."),
    ("not", "Returns the boolean negation of its single argument."),
    ("or", "Returns the boolean OR of its arguments by returning the first non-empty argument or the last argument."),
    ("print", "An alias for fmt.Sprint."),
    ("printf", "An alias for fmt.Sprintf."),
    ("println", "An alias for fmt.Sprintln."),
    ("urlquery", "Returns the escaped value of the textual representation of its arguments in a form suitable for embedding in a URL query."),
    ("eq", "Returns the boolean truth of arg1 == arg2, or of arg1 equal to any of the following arguments."),
    ("ne", "Returns the boolean truth of arg1 != arg2."),
    ("lt", "Returns the boolean truth of arg1 < arg2."),
    ("le", "Returns the boolean truth of arg1 <= arg2."),
    ("gt", "Returns the boolean truth of arg1 > arg2."),
    ("ge", "Returns the boolean truth of arg1 >= arg2."),
];

/// Pair of markers surrounding actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters {
    open: Arc<str>,
    close: Arc<str>,
}

impl Delimiters {
    /// Returns `None` if either delimiter is empty or contains whitespace
    pub fn new(open: &str, close: &str) -> Option<Delimiters> {
        let valid = |delim: &str| !delim.is_empty() && !delim.contains(char::is_whitespace);

        if valid(open) && valid(close) {
            Some(Delimiters {
                open: open.into(),
                close: close.into(),
            })
        } else {
            None
        }
    }

    pub fn open(&self) -> &str {
        &self.open
    }

    pub fn close(&self) -> &str {
        &self.close
    }
}

impl Default for Delimiters {
    fn default() -> Delimiters {
        Delimiters {
            open: DEFAULT_OPEN_DELIMITER.into(),
            close: DEFAULT_CLOSE_DELIMITER.into(),
        }
    }
}

/// Set of function names a pipeline may call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSet {
    // Function name to optional documentation
    functions: BTreeMap<Arc<str>, Option<Arc<str>>>,
}

impl FunctionSet {
    pub fn empty() -> FunctionSet {
        FunctionSet {
            functions: BTreeMap::new(),
        }
    }

    pub fn builtins() -> FunctionSet {
        FunctionSet {
            functions: BUILTIN_FUNCTIONS
                .iter()
                .map(|(name, doc)| (Arc::from(*name), Some(Arc::from(*doc))))
                .collect(),
        }
    }

    pub fn insert(&mut self, name: &str) {
        self.functions.entry(name.into()).or_insert(None);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn doc(&self, name: &str) -> Option<&str> {
        self.functions.get(name).and_then(|doc| doc.as_deref())
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Iterates over function names and documentation in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.functions
            .iter()
            .map(|(name, doc)| (name.as_ref(), doc.as_deref()))
    }
}

impl Default for FunctionSet {
    fn default() -> FunctionSet {
        FunctionSet::builtins()
    }
}

/// Language configuration shared by the lexer, parser and analyser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub delimiters: Delimiters,
    pub functions: FunctionSet,
    /// Maximum depth of nested block actions or `None` for no limit
    pub max_nesting_depth: Option<usize>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            delimiters: Delimiters::default(),
            functions: FunctionSet::builtins(),
            max_nesting_depth: Some(DEFAULT_MAX_NESTING_DEPTH),
        }
    }
}
