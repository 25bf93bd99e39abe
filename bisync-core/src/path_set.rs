use indexmap::IndexSet;

/// Deduplicated, insertion-ordered set of root-relative paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSet {
    paths: IndexSet<String>,
}

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `path`, normalising separators. Returns false when already present.
    pub fn insert(&mut self, path: impl AsRef<str>) -> bool {
        self.paths.insert(normalize(path.as_ref()))
    }

    pub fn remove(&mut self, path: &str) -> bool {
        self.paths.shift_remove(normalize(path).as_str())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(normalize(path).as_str())
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    /// Items of `candidates` not recorded in this set.
    pub fn not_in<'a, I>(&'a self, candidates: I) -> impl Iterator<Item = I::Item> + 'a
    where
        I: IntoIterator,
        I::IntoIter: 'a,
        I::Item: AsRef<str>,
    {
        candidates
            .into_iter()
            .filter(move |c| !self.contains(c.as_ref()))
    }
}

impl IntoIterator for PathSet {
    type Item = String;
    type IntoIter = indexmap::set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.into_iter()
    }
}

impl<S: AsRef<str>> FromIterator<S> for PathSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut set = PathSet::new();
        for p in iter {
            set.insert(p);
        }
        set
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}
