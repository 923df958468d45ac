//! Path filtering for watch events.
//!
//! Filters run on the watcher thread, before an event is sent to the signal
//! channel. A reader combines three of them, built from its
//! [`WatchConfig`] by [`filter_for`]:
//!
//! - [`SuffixFilter`] - only files whose name ends in the configured suffix
//! - [`HiddenFileFilter`] - drops dot files unless dot files are enabled
//! - [`IgnoreFilter`] - drops anything at or below an ignored path

use camino::{Utf8Path, Utf8PathBuf};
use otf_core::WatchConfig;
use smallvec::SmallVec;

/// A filter for determining which paths to report.
///
/// Filters must be [`Send`] and [`Sync`] because they are used from the
/// watcher thread, and `'static` to be moved into it.
pub trait FileFilter: Send + Sync + 'static {
    /// Returns `true` if a change at `path` should be reported.
    fn should_process(&self, path: &Utf8Path) -> bool;
}

/// A filter that accepts every path.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllFilter;

impl FileFilter for AcceptAllFilter {
    #[inline]
    fn should_process(&self, _path: &Utf8Path) -> bool {
        true
    }
}

/// Accepts files whose name ends in `.{suffix}`, ignoring case.
///
/// The name must have at least one character before the suffix, so a file
/// called just `.csv` does not match `csv`.
///
/// # Examples
///
/// ```
/// use otf_watcher::{FileFilter, SuffixFilter};
/// use camino::Utf8Path;
///
/// let filter = SuffixFilter::new(".csv");
/// assert!(filter.should_process(Utf8Path::new("in/results.CSV")));
/// assert!(!filter.should_process(Utf8Path::new("in/results.json")));
/// ```
#[derive(Debug, Clone)]
pub struct SuffixFilter {
    /// Lowercased `.suffix`.
    dotted: String,
}

impl SuffixFilter {
    /// Creates a suffix filter. Leading dots in `suffix` are ignored.
    #[must_use]
    pub fn new(suffix: &str) -> Self {
        Self {
            dotted: format!(".{}", suffix.trim_matches('.').to_ascii_lowercase()),
        }
    }
}

impl FileFilter for SuffixFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        path.file_name().is_some_and(|name| {
            let name = name.to_ascii_lowercase();
            name.len() > self.dotted.len() && name.ends_with(&self.dotted)
        })
    }
}

/// Rejects paths with a dot-prefixed component below the watch root.
///
/// The root itself may live under a hidden directory; only components after
/// it are inspected.
#[derive(Debug, Clone)]
pub struct HiddenFileFilter {
    root: Utf8PathBuf,
}

impl HiddenFileFilter {
    /// Creates a filter relative to the watch root.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileFilter for HiddenFileFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        !relative
            .components()
            .any(|c| c.as_str().starts_with('.') && c.as_str() != "." && c.as_str() != "..")
    }
}

/// Rejects any path equal to, or nested under, one of the ignored paths.
#[derive(Debug, Clone, Default)]
pub struct IgnoreFilter {
    ignored: SmallVec<[Utf8PathBuf; 4]>,
}

impl IgnoreFilter {
    /// Creates a filter from absolute paths.
    #[must_use]
    pub fn new(paths: impl IntoIterator<Item = Utf8PathBuf>) -> Self {
        Self {
            ignored: paths.into_iter().collect(),
        }
    }

    /// Returns `true` if nothing is ignored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ignored.is_empty()
    }
}

impl FileFilter for IgnoreFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        !self.ignored.iter().any(|ignored| path.starts_with(ignored))
    }
}

/// A composite filter that combines multiple filters with AND logic.
///
/// An empty composite accepts all paths.
#[derive(Default)]
pub struct CompositeFilter {
    filters: Vec<Box<dyn FileFilter>>,
}

impl CompositeFilter {
    /// Creates a new empty composite filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter to the composite.
    #[must_use]
    pub fn and<F: FileFilter>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Returns the number of filters combined.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Returns `true` if no filters are combined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl FileFilter for CompositeFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        self.filters.iter().all(|f| f.should_process(path))
    }
}

impl<F: FileFilter + ?Sized> FileFilter for Box<F> {
    fn should_process(&self, path: &Utf8Path) -> bool {
        (**self).should_process(path)
    }
}

impl<F: FileFilter + ?Sized> FileFilter for std::sync::Arc<F> {
    fn should_process(&self, path: &Utf8Path) -> bool {
        (**self).should_process(path)
    }
}

/// Builds the filter chain a reader uses for `config`.
#[must_use]
pub fn filter_for(config: &WatchConfig) -> CompositeFilter {
    let mut filter = CompositeFilter::new();
    if let Some(suffix) = config.suffix() {
        filter = filter.and(SuffixFilter::new(suffix));
    }
    if !config.dotfiles() {
        filter = filter.and(HiddenFileFilter::new(config.folder()));
    }
    let ignore = IgnoreFilter::new(config.ignore().iter().cloned());
    if !ignore.is_empty() {
        filter = filter.and(ignore);
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;
    use otf_core::ReaderSettings;

    #[test]
    fn test_accept_all_filter() {
        assert!(AcceptAllFilter.should_process(Utf8Path::new("anything.txt")));
    }

    #[test]
    fn test_suffix_filter() {
        let filter = SuffixFilter::new("csv");
        assert!(filter.should_process(Utf8Path::new("/in/a.csv")));
        assert!(filter.should_process(Utf8Path::new("/in/A.CSV")));
        assert!(filter.should_process(Utf8Path::new("/in/my results.csv")));
        assert!(!filter.should_process(Utf8Path::new("/in/a.csv.bak")));
        assert!(!filter.should_process(Utf8Path::new("/in/acsv")));
        assert!(!filter.should_process(Utf8Path::new("/in/.csv")));
    }

    #[test]
    fn test_suffix_filter_trims_dots() {
        let filter = SuffixFilter::new("..json");
        assert!(filter.should_process(Utf8Path::new("a.json")));
    }

    #[test]
    fn test_hidden_file_filter() {
        let filter = HiddenFileFilter::new("/root/.data/in");
        assert!(filter.should_process(Utf8Path::new("/root/.data/in/a.csv")));
        assert!(filter.should_process(Utf8Path::new("/root/.data/in/sub/a.csv")));
        assert!(!filter.should_process(Utf8Path::new("/root/.data/in/.a.csv")));
        assert!(!filter.should_process(Utf8Path::new("/root/.data/in/.tmp/a.csv")));
    }

    #[test]
    fn test_ignore_filter() {
        let filter = IgnoreFilter::new([
            Utf8PathBuf::from("/in/tmp"),
            Utf8PathBuf::from("/in/skip.csv"),
        ]);
        assert!(filter.should_process(Utf8Path::new("/in/a.csv")));
        assert!(filter.should_process(Utf8Path::new("/in/tmpfile.csv")));
        assert!(!filter.should_process(Utf8Path::new("/in/tmp/a.csv")));
        assert!(!filter.should_process(Utf8Path::new("/in/skip.csv")));
    }

    #[test]
    fn test_composite_filter() {
        let filter = CompositeFilter::new()
            .and(SuffixFilter::new("csv"))
            .and(IgnoreFilter::new([Utf8PathBuf::from("/in/old")]));

        assert!(filter.should_process(Utf8Path::new("/in/a.csv")));
        assert!(!filter.should_process(Utf8Path::new("/in/a.json")));
        assert!(!filter.should_process(Utf8Path::new("/in/old/a.csv")));
        assert!(CompositeFilter::new().should_process(Utf8Path::new("x")));
    }

    #[test]
    fn test_filter_for_config() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let config = ReaderSettings::new()
            .topic("t1")
            .folder(dir.path().to_string_lossy())
            .suffix(".csv")
            .ignore("old")
            .build()
            .expect("valid config");

        let filter = filter_for(config.watch());
        assert_eq!(filter.len(), 3);

        let root = config.watch().folder();
        assert!(filter.should_process(&root.join("a.csv")));
        assert!(!filter.should_process(&root.join(".a.csv")));
        assert!(!filter.should_process(&root.join("old/a.csv")));
        assert!(!filter.should_process(&root.join("a.json")));
    }

    #[test]
    fn test_filter_for_dotfiles_enabled() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let config = ReaderSettings::new()
            .topic("t1")
            .folder(dir.path().to_string_lossy())
            .dotfiles(true)
            .build()
            .expect("valid config");

        let filter = filter_for(config.watch());
        assert!(filter.is_empty());
        assert!(filter.should_process(&config.watch().folder().join(".hidden")));
    }
}
