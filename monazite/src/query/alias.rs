use crate::collection::DOC_ID;
use std::collections::HashMap;

/// Per-model table mapping logical (model-facing) field names to the
/// physical names stored in the collection.
///
/// Translation rules, in order:
/// - keys beginning with `$` are operator keywords and never translate
/// - `id` and `_id` always translate to the physical identifier field
/// - a whole-name alias wins over any segment translation
/// - for dotted paths, only the first segment is translated; the
///   remainder of the path is kept verbatim
#[derive(Clone, Default, Debug)]
pub struct FieldAliases {
    aliases: HashMap<String, String>,
}

impl FieldAliases {
    pub fn new() -> Self {
        FieldAliases {
            aliases: HashMap::new(),
        }
    }

    /// Registers an alias from a logical name to a physical name.
    pub fn insert(&mut self, logical: impl Into<String>, physical: impl Into<String>) {
        self.aliases.insert(logical.into(), physical.into());
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Translates a logical field name (possibly a dotted path) to its
    /// physical stored name.
    pub fn translate(&self, name: &str) -> String {
        if name.starts_with('$') {
            return name.to_string();
        }
        if name == "id" || name == DOC_ID {
            return DOC_ID.to_string();
        }
        if let Some(physical) = self.aliases.get(name) {
            return physical.clone();
        }
        if let Some((head, tail)) = name.split_once('.') {
            if head == "id" {
                return format!("{}.{}", DOC_ID, tail);
            }
            if let Some(physical) = self.aliases.get(head) {
                return format!("{}.{}", physical, tail);
            }
        }
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases() -> FieldAliases {
        let mut aliases = FieldAliases::new();
        aliases.insert("title", "t");
        aliases.insert("author.name", "a.n");
        aliases.insert("author", "a");
        aliases
    }

    #[test]
    fn test_identifier_is_always_special() {
        let aliases = aliases();
        assert_eq!(aliases.translate("id"), "_id");
        assert_eq!(aliases.translate("_id"), "_id");
    }

    #[test]
    fn test_operator_keys_skip_translation() {
        assert_eq!(aliases().translate("$or"), "$or");
        assert_eq!(aliases().translate("$where"), "$where");
    }

    #[test]
    fn test_whole_name_alias_wins() {
        assert_eq!(aliases().translate("author.name"), "a.n");
    }

    #[test]
    fn test_dotted_path_translates_first_segment() {
        assert_eq!(aliases().translate("author.email"), "a.email");
        assert_eq!(aliases().translate("title"), "t");
    }

    #[test]
    fn test_unaliased_names_pass_through() {
        assert_eq!(aliases().translate("counter"), "counter");
        assert_eq!(aliases().translate("nested.deep.field"), "nested.deep.field");
    }
}
