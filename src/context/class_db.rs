use crate::core::ClassTag;
use std::collections::HashMap;
use std::sync::Arc;

/// Identity of an allocated type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassEntry {
    classloader_id: i64,
    class_name: String,
    tag: ClassTag,
}

impl ClassEntry {
    pub fn classloader_id(&self) -> i64 {
        self.classloader_id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn tag(&self) -> ClassTag {
        self.tag
    }

    /// Class name without its package.
    pub fn simple_name(&self) -> &str {
        self.class_name
            .rsplit_once('.')
            .map(|(_, simple)| simple)
            .unwrap_or(&self.class_name)
    }

    /// Package portion of the class name, empty for the default package.
    pub fn package_name(&self) -> &str {
        self.class_name
            .rsplit_once('.')
            .map(|(package, _)| package)
            .unwrap_or("")
    }
}

/// Registry of class identities. Entries are never removed.
#[derive(Debug, Default)]
pub struct ClassDb {
    by_tag: HashMap<ClassTag, Arc<ClassEntry>>,
    by_name: HashMap<(i64, String), Arc<ClassEntry>>,
}

impl ClassDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class, returning the existing entry if the tag is known.
    pub fn register_class(
        &mut self,
        classloader_id: i64,
        class_name: &str,
        tag: ClassTag,
    ) -> Arc<ClassEntry> {
        if let Some(existing) = self.by_tag.get(&tag) {
            return Arc::clone(existing);
        }

        let entry = Arc::new(ClassEntry {
            classloader_id,
            class_name: class_name.to_string(),
            tag,
        });
        self.by_tag.insert(tag, Arc::clone(&entry));
        self.by_name
            .entry((classloader_id, class_name.to_string()))
            .or_insert_with(|| Arc::clone(&entry));
        entry
    }

    pub fn entry(&self, tag: ClassTag) -> Option<Arc<ClassEntry>> {
        self.by_tag.get(&tag).cloned()
    }

    pub fn find(&self, classloader_id: i64, class_name: &str) -> Option<Arc<ClassEntry>> {
        self.by_name
            .get(&(classloader_id, class_name.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }
}
