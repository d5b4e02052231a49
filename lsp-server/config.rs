use serde::Deserialize;
use tracing::warn;

use go_template_syntax::config::{Config, Delimiters, FunctionSet};

pub const DEFAULT_MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;

/// Source offsets are 32-bit so no document may be longer
pub const MAX_DOCUMENT_SIZE_LIMIT: usize = u32::MAX as usize;

pub const DEFAULT_EXTENSIONS: &[&str] = &["tpl", "tmpl", "gotmpl", "gohtml", "html"];

/// Client supplied `initializationOptions`
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializationOptions {
    pub delimiters: Option<DelimiterOptions>,
    pub functions: Vec<String>,
    pub replace_builtin_functions: bool,
    /// Zero disables the limit
    pub max_nesting_depth: Option<usize>,
    pub max_document_size: Option<usize>,
    pub extensions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct DelimiterOptions {
    pub open: String,
    pub close: String,
}

/// Configuration negotiated at `initialize`
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub syntax: Config,
    pub max_document_size: usize,
    /// Extensions of tracked documents without their leading `.`
    ///
    /// An empty list tracks every document.
    pub extensions: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            syntax: Config::default(),
            max_document_size: DEFAULT_MAX_DOCUMENT_SIZE,
            extensions: DEFAULT_EXTENSIONS.iter().map(|ext| (*ext).to_owned()).collect(),
        }
    }
}

impl ServerConfig {
    /// Builds a configuration from the raw `initializationOptions` value
    ///
    /// Invalid options are logged and replaced with their defaults.
    pub fn from_initialization_options(options: Option<serde_json::Value>) -> ServerConfig {
        let options = match options {
            None | Some(serde_json::Value::Null) => InitializationOptions::default(),
            Some(value) => match serde_json::from_value(value) {
                Ok(options) => options,
                Err(err) => {
                    warn!("Ignoring invalid initialization options: {}", err);
                    InitializationOptions::default()
                }
            },
        };

        ServerConfig::from_options(options)
    }

    pub fn from_options(options: InitializationOptions) -> ServerConfig {
        let mut config = ServerConfig::default();

        if let Some(DelimiterOptions { open, close }) = options.delimiters {
            match Delimiters::new(&open, &close) {
                Some(delimiters) => config.syntax.delimiters = delimiters,
                None => warn!("Ignoring invalid delimiters {:?} and {:?}", open, close),
            }
        }

        if options.replace_builtin_functions {
            config.syntax.functions = FunctionSet::empty();
        }
        for function in &options.functions {
            config.syntax.functions.insert(function);
        }

        if let Some(max_nesting_depth) = options.max_nesting_depth {
            config.syntax.max_nesting_depth = Some(max_nesting_depth).filter(|depth| *depth > 0);
        }

        if let Some(max_document_size) = options.max_document_size {
            if max_document_size > MAX_DOCUMENT_SIZE_LIMIT {
                warn!(
                    "Clamping maxDocumentSize {} to {}",
                    max_document_size, MAX_DOCUMENT_SIZE_LIMIT
                );
            }
            config.max_document_size = max_document_size.min(MAX_DOCUMENT_SIZE_LIMIT);
        }

        if let Some(extensions) = options.extensions {
            config.extensions = extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect();
        }

        config
    }

    /// Returns true if the document at `uri` should be tracked
    pub fn accepts(&self, uri: &lsp_types::Url) -> bool {
        if self.extensions.is_empty() {
            return true;
        }

        let path = uri.path();
        let file_name = path.rsplit('/').next().unwrap_or(path);

        match file_name.rsplit_once('.') {
            Some((_, ext)) => self
                .extensions
                .iter()
                .any(|accepted| accepted.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn url(s: &str) -> lsp_types::Url {
        lsp_types::Url::parse(s).unwrap()
    }

    #[test]
    fn defaults_without_options() {
        assert_eq!(
            ServerConfig::default(),
            ServerConfig::from_initialization_options(None)
        );
        assert_eq!(
            ServerConfig::default(),
            ServerConfig::from_initialization_options(Some(serde_json::Value::Null))
        );
    }

    #[test]
    fn parses_camel_case_options() {
        let config = ServerConfig::from_initialization_options(Some(serde_json::json!({
            "delimiters": {"open": "[[", "close": "]]"},
            "functions": ["include", "toYaml"],
            "replaceBuiltinFunctions": true,
            "maxNestingDepth": 0,
            "maxDocumentSize": 1024,
            "extensions": [".TPL", "yaml"]
        })));

        assert_eq!("[[", config.syntax.delimiters.open());
        assert_eq!("]]", config.syntax.delimiters.close());
        assert!(config.syntax.functions.contains("toYaml"));
        assert!(!config.syntax.functions.contains("printf"));
        assert_eq!(None, config.syntax.max_nesting_depth);
        assert_eq!(1024, config.max_document_size);
        assert_eq!(vec!["tpl".to_owned(), "yaml".to_owned()], config.extensions);
    }

    #[test]
    fn document_size_fits_offsets() {
        let config = ServerConfig::from_initialization_options(Some(serde_json::json!({
            "maxDocumentSize": u64::MAX
        })));

        assert_eq!(u32::MAX as usize, config.max_document_size);
    }

    #[test]
    fn extra_functions_extend_builtins() {
        let config = ServerConfig::from_initialization_options(Some(serde_json::json!({
            "functions": ["include"]
        })));

        assert!(config.syntax.functions.contains("include"));
        assert!(config.syntax.functions.contains("printf"));
    }

    #[test]
    fn invalid_options_fall_back_to_defaults() {
        let config = ServerConfig::from_initialization_options(Some(serde_json::json!({
            "functions": "not a list"
        })));
        assert_eq!(ServerConfig::default(), config);

        let config = ServerConfig::from_initialization_options(Some(serde_json::json!({
            "delimiters": {"open": "", "close": "}}"}
        })));
        assert_eq!(Delimiters::default(), config.syntax.delimiters);
    }

    #[test]
    fn extension_filter() {
        let config = ServerConfig::default();

        assert!(config.accepts(&url("file:///site/index.gohtml")));
        assert!(config.accepts(&url("file:///site/page.HTML")));
        assert!(!config.accepts(&url("file:///site/main.go")));
        assert!(!config.accepts(&url("file:///site.tpl/README")));

        let config = ServerConfig {
            extensions: vec![],
            ..ServerConfig::default()
        };
        assert!(config.accepts(&url("file:///site/main.go")));
    }
}
