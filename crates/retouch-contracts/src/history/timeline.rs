/// Linear undo/redo history of image snapshots.
///
/// `entries[0]` is the uploaded original and stays fixed until the history is
/// re-initialized or cleared. A new edit truncates everything after the cursor,
/// so there is never more than one redo branch.
///
/// None of the operations fail: undo/redo past either end are no-ops.
#[derive(Debug, Clone, PartialEq)]
pub struct EditHistory<T> {
    entries: Vec<T>,
    cursor: Option<usize>,
}

impl<T> Default for EditHistory<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            cursor: None,
        }
    }
}

impl<T> EditHistory<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any prior history with a single original snapshot.
    pub fn initialize(&mut self, snapshot: T) {
        self.entries.clear();
        self.entries.push(snapshot);
        self.cursor = Some(0);
    }

    /// Drops the redo branch, pushes `snapshot`, and moves the cursor onto it.
    ///
    /// On an empty history this behaves like [`EditHistory::initialize`].
    pub fn append(&mut self, snapshot: T) {
        let keep = self.cursor.map(|cursor| cursor + 1).unwrap_or(0);
        self.entries.truncate(keep);
        self.entries.push(snapshot);
        self.cursor = Some(self.entries.len() - 1);
    }

    pub fn undo(&mut self) -> bool {
        match self.cursor {
            Some(cursor) if cursor > 0 => {
                self.cursor = Some(cursor - 1);
                true
            }
            _ => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        if !self.can_redo() {
            return false;
        }
        self.cursor = self.cursor.map(|cursor| cursor + 1);
        true
    }

    /// Returns to the original and drops every later snapshot.
    pub fn reset(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        self.entries.truncate(1);
        self.cursor = Some(0);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.cursor, Some(cursor) if cursor > 0)
    }

    pub fn can_redo(&self) -> bool {
        matches!(self.cursor, Some(cursor) if cursor + 1 < self.entries.len())
    }

    /// `None` when no image is loaded.
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    pub fn current(&self) -> Option<&T> {
        self.cursor.and_then(|cursor| self.entries.get(cursor))
    }

    pub fn previous(&self) -> Option<&T> {
        match self.cursor {
            Some(cursor) if cursor > 0 => self.entries.get(cursor - 1),
            _ => None,
        }
    }

    pub fn original(&self) -> Option<&T> {
        self.entries.first()
    }
}
