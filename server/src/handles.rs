use std::collections::HashMap;

const START_HANDLE: i64 = 1000;

/// Integer handles for things the client refers back to by number
///
/// Handles start at 1000 so they cannot be mistaken for the `0` meaning
/// "nothing to expand".
#[derive(Debug)]
pub(crate) struct Handles<T> {
    next: i64,
    items: HashMap<i64, T>,
}

impl<T> Default for Handles<T> {
    fn default() -> Self {
        Self {
            next: START_HANDLE,
            items: HashMap::new(),
        }
    }
}

impl<T> Handles<T> {
    pub fn create(&mut self, item: T) -> i64 {
        let handle = self.next;
        self.next += 1;
        self.items.insert(handle, item);
        handle
    }

    pub fn get(&self, handle: i64) -> Option<&T> {
        self.items.get(&handle)
    }

    pub fn get_mut(&mut self, handle: i64) -> Option<&mut T> {
        self.items.get_mut(&handle)
    }

    /// Forget every handle; numbering starts over
    pub fn reset(&mut self) {
        self.next = START_HANDLE;
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_sequential_and_reset() {
        let mut handles = Handles::default();
        let a = handles.create("a");
        let b = handles.create("b");

        assert_eq!((a, b), (1000, 1001));
        assert_eq!(handles.get(b), Some(&"b"));

        handles.reset();
        assert_eq!(handles.get(a), None);
        assert_eq!(handles.create("c"), 1000);
    }
}
