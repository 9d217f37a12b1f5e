//! How each benchmark repository runs its tests.
//!
//! The dataset spans a fixed set of repositories, so the mapping is a static
//! table of [`TestConvention`] values that a YAML file can extend or
//! override:
//!
//! ```yaml
//! django/django:
//!   kind: django_runtests
//! acme/widgets:
//!   kind: custom
//!   program: make
//!   args: [test]
//!   log_format: pytest
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::log_parser::LogFormat;
use crate::error::ConventionError;
use crate::workspace::validate_repo_name;

/// Test invocation convention of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestConvention {
    /// `python -m pytest -rA [args] [files]`.
    Pytest {
        #[serde(default)]
        args: Vec<String>,
    },
    /// `python tests/runtests.py --settings=test_sqlite [labels]`.
    DjangoRuntests,
    /// `python bin/test -C --verbose [files]`.
    SympyBinTest,
    /// Arbitrary command; directives are appended to `args`.
    Custom {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        log_format: LogFormat,
    },
}

/// A concrete command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub log_format: LogFormat,
}

impl Invocation {
    /// Command line for logging.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl TestConvention {
    pub fn pytest() -> Self {
        Self::Pytest { args: Vec::new() }
    }

    pub fn log_format(&self) -> LogFormat {
        match self {
            Self::Pytest { .. } => LogFormat::Pytest,
            Self::DjangoRuntests => LogFormat::Django,
            Self::SympyBinTest => LogFormat::Sympy,
            Self::Custom { log_format, .. } => *log_format,
        }
    }

    /// Turn test file paths into arguments this convention accepts.
    ///
    /// Python runners only take `.py` files; Django takes dotted module
    /// labels relative to `tests/`.
    pub fn directives(&self, files: &[String]) -> Vec<String> {
        match self {
            Self::Custom { .. } => files.to_vec(),
            Self::DjangoRuntests => files
                .iter()
                .filter(|f| f.ends_with(".py"))
                .map(|f| django_label(f))
                .collect(),
            Self::Pytest { .. } | Self::SympyBinTest => {
                files.iter().filter(|f| f.ends_with(".py")).cloned().collect()
            }
        }
    }

    /// Build the command line for this convention.
    pub fn invocation(&self, python: &str, directives: &[String]) -> Invocation {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let (program, mut args, env) = match self {
            Self::Pytest { args } => {
                let mut base = owned(&["-m", "pytest", "-rA", "--tb=no", "-p", "no:cacheprovider"]);
                base.extend(args.iter().cloned());
                (python.to_string(), base, Vec::new())
            }
            Self::DjangoRuntests => (
                python.to_string(),
                owned(&[
                    "tests/runtests.py",
                    "--settings=test_sqlite",
                    "--parallel",
                    "1",
                    "--verbosity",
                    "2",
                ]),
                vec![("PYTHONIOENCODING".to_string(), "utf-8".to_string())],
            ),
            Self::SympyBinTest => (
                python.to_string(),
                owned(&["bin/test", "-C", "--verbose", "--no-colors"]),
                Vec::new(),
            ),
            Self::Custom { program, args, .. } => (program.clone(), args.clone(), Vec::new()),
        };
        args.extend(directives.iter().cloned());
        Invocation {
            program,
            args,
            env,
            log_format: self.log_format(),
        }
    }
}

/// `tests/admin_views/tests.py` becomes `admin_views.tests`.
fn django_label(path: &str) -> String {
    let path = path.strip_prefix("tests/").unwrap_or(path);
    let path = path.strip_suffix(".py").unwrap_or(path);
    path.replace('/', ".")
}

/// Repositories of the benchmark and their conventions.
pub const BUILTIN_REPOSITORIES: [&str; 12] = [
    "astropy/astropy",
    "django/django",
    "matplotlib/matplotlib",
    "mwaskom/seaborn",
    "pallets/flask",
    "psf/requests",
    "pydata/xarray",
    "pylint-dev/pylint",
    "pytest-dev/pytest",
    "scikit-learn/scikit-learn",
    "sphinx-doc/sphinx",
    "sympy/sympy",
];

fn builtin_convention(repo: &str) -> TestConvention {
    match repo {
        "django/django" => TestConvention::DjangoRuntests,
        "sympy/sympy" => TestConvention::SympyBinTest,
        "sphinx-doc/sphinx" => TestConvention::Pytest {
            args: vec!["-W".to_string(), "ignore::DeprecationWarning".to_string()],
        },
        _ => TestConvention::pytest(),
    }
}

/// Lookup table from repository id to convention.
#[derive(Debug, Clone)]
pub struct ConventionRegistry {
    conventions: BTreeMap<String, TestConvention>,
}

impl Default for ConventionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ConventionRegistry {
    /// The built-in table of benchmark repositories.
    pub fn builtin() -> Self {
        let conventions = BUILTIN_REPOSITORIES
            .iter()
            .map(|repo| (repo.to_string(), builtin_convention(repo)))
            .collect();
        Self { conventions }
    }

    pub fn empty() -> Self {
        Self {
            conventions: BTreeMap::new(),
        }
    }

    pub fn get(&self, repo: &str) -> Option<&TestConvention> {
        self.conventions.get(repo)
    }

    pub fn insert(&mut self, repo: impl Into<String>, convention: TestConvention) {
        self.conventions.insert(repo.into(), convention);
    }

    pub fn len(&self) -> usize {
        self.conventions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conventions.is_empty()
    }

    pub fn repositories(&self) -> impl Iterator<Item = &str> {
        self.conventions.keys().map(String::as_str)
    }

    /// Merge overrides from YAML text. Returns the number of entries merged.
    pub fn merge_yaml(&mut self, yaml: &str) -> Result<usize, ConventionError> {
        let overrides: BTreeMap<String, TestConvention> = serde_yaml::from_str(yaml)?;
        for (repo, convention) in &overrides {
            validate_repo_name(repo).map_err(|e| ConventionError::Invalid {
                repo: repo.clone(),
                reason: e.to_string(),
            })?;
            if let TestConvention::Custom { program, .. } = convention {
                if program.trim().is_empty() {
                    return Err(ConventionError::Invalid {
                        repo: repo.clone(),
                        reason: "custom convention needs a program".to_string(),
                    });
                }
            }
        }
        let count = overrides.len();
        self.conventions.extend(overrides);
        Ok(count)
    }

    /// Merge overrides from a YAML file.
    pub fn load_overrides(&mut self, path: &Path) -> Result<usize, ConventionError> {
        let content = std::fs::read_to_string(path)?;
        let count = self.merge_yaml(&content)?;
        tracing::info!(path = %path.display(), count, "Test convention overrides loaded");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_covers_benchmark_repos() {
        let registry = ConventionRegistry::builtin();
        assert_eq!(registry.len(), 12);
        assert_eq!(
            registry.get("django/django"),
            Some(&TestConvention::DjangoRuntests)
        );
        assert_eq!(
            registry.get("sympy/sympy"),
            Some(&TestConvention::SympyBinTest)
        );
        assert!(matches!(
            registry.get("psf/requests"),
            Some(TestConvention::Pytest { .. })
        ));
        assert!(registry.get("unknown/repo").is_none());
    }

    #[test]
    fn test_pytest_invocation() {
        let inv = TestConvention::pytest().invocation(
            "python3",
            &["tests/test_a.py".to_string()],
        );
        assert_eq!(inv.program, "python3");
        assert_eq!(inv.args[..3], ["-m", "pytest", "-rA"]);
        assert_eq!(inv.args.last().map(String::as_str), Some("tests/test_a.py"));
        assert_eq!(inv.log_format, LogFormat::Pytest);
    }

    #[test]
    fn test_django_invocation_and_labels() {
        let convention = TestConvention::DjangoRuntests;
        let directives = convention.directives(&[
            "tests/admin_views/tests.py".to_string(),
            "tests/admin_views/fixtures/data.json".to_string(),
            "tests/i18n/sampleproject/views.py".to_string(),
        ]);
        assert_eq!(
            directives,
            vec!["admin_views.tests", "i18n.sampleproject.views"]
        );
        let inv = convention.invocation("python", &directives);
        assert_eq!(inv.args[0], "tests/runtests.py");
        assert!(inv.args.contains(&"--settings=test_sqlite".to_string()));
        assert_eq!(inv.log_format, LogFormat::Django);
        assert!(inv.display().ends_with("admin_views.tests i18n.sampleproject.views"));
    }

    #[test]
    fn test_custom_keeps_all_files() {
        let convention = TestConvention::Custom {
            program: "make".to_string(),
            args: vec!["test".to_string()],
            log_format: LogFormat::Pytest,
        };
        let files = vec!["a.rs".to_string(), "b.py".to_string()];
        let inv = convention.invocation("python", &convention.directives(&files));
        assert_eq!(inv.program, "make");
        assert_eq!(inv.args, vec!["test", "a.rs", "b.py"]);
    }

    #[test]
    fn test_yaml_overrides_extend_and_replace() {
        let mut registry = ConventionRegistry::builtin();
        let yaml = "\
psf/requests:
  kind: pytest
  args: [\"-x\"]
acme/widgets:
  kind: custom
  program: ./run-tests.sh
  log_format: sympy
";
        assert_eq!(registry.merge_yaml(yaml).unwrap(), 2);
        assert_eq!(registry.len(), 13);
        assert_eq!(
            registry.get("psf/requests"),
            Some(&TestConvention::Pytest {
                args: vec!["-x".to_string()]
            })
        );
        assert_eq!(
            registry.get("acme/widgets").map(TestConvention::log_format),
            Some(LogFormat::Sympy)
        );
    }

    #[test]
    fn test_yaml_overrides_reject_bad_entries() {
        let mut registry = ConventionRegistry::empty();
        let err = registry
            .merge_yaml("\"bad repo\":\n  kind: pytest\n")
            .unwrap_err();
        assert!(matches!(err, ConventionError::Invalid { .. }));

        let err = registry
            .merge_yaml("a/b:\n  kind: custom\n  program: \"\"\n  log_format: pytest\n")
            .unwrap_err();
        assert!(matches!(err, ConventionError::Invalid { .. }));

        assert!(matches!(
            registry.merge_yaml("a/b:\n  kind: nosetests\n"),
            Err(ConventionError::Yaml(_))
        ));
        assert!(registry.is_empty());
    }
}
