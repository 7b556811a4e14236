//! Ordered systemd unit documents.
//!
//! A document is a sequence of blocks, each block a sequence of sections,
//! each section an ordered list of key/value pairs. Nothing is ever sorted:
//! rendering the same document always yields the same bytes.

use std::fmt;

/// One `[Name]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// Append an entry, keeping insertion order.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    /// Append an entry only if a value is present.
    pub fn set_opt(self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.set(key, value),
            None => self,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }
}

/// A group of sections emitted together (a primary block, a peer, a route).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    sections: Vec<Section>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }
}

/// A complete unit file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitDocument {
    blocks: Vec<Block>,
}

impl UnitDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// All sections named `name`, in document order.
    pub fn sections_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Section> + 'a {
        self.blocks
            .iter()
            .flat_map(|block| block.sections.iter())
            .filter(move |section| section.name == name)
    }

    /// Render to INI text.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for UnitDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;

        for section in self.blocks.iter().flat_map(|block| block.sections.iter()) {
            if !first {
                writeln!(f)?;
            }
            first = false;

            writeln!(f, "[{}]", section.name)?;

            for (key, value) in &section.entries {
                writeln!(f, "{key}={value}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_keeps_insertion_order() {
        let mut doc = UnitDocument::new();
        doc.push(
            Block::new()
                .with(Section::new("Match").set("Name", "wg0"))
                .with(Section::new("Network").set("Address", "10.0.0.2/24")),
        );
        doc.push(
            Block::new().with(
                Section::new("Route")
                    .set("Gateway", "10.0.0.1")
                    .set("Destination", "0.0.0.0/0")
                    .set_opt("GatewayOnlink", None::<&str>),
            ),
        );

        assert_eq!(
            doc.render(),
            "[Match]\nName=wg0\n\n[Network]\nAddress=10.0.0.2/24\n\n\
             [Route]\nGateway=10.0.0.1\nDestination=0.0.0.0/0\n"
        );
    }

    #[test]
    fn test_sections_named() {
        let mut doc = UnitDocument::new();
        doc.push(Block::new().with(Section::new("Route").set("Destination", "a")));
        doc.push(Block::new().with(Section::new("Other")));
        doc.push(Block::new().with(Section::new("Route").set("Destination", "b")));

        let destinations: Vec<_> = doc
            .sections_named("Route")
            .filter_map(|s| s.get("Destination"))
            .collect();
        assert_eq!(destinations, vec!["a", "b"]);
    }

    #[test]
    fn test_empty_document() {
        assert_eq!(UnitDocument::new().render(), "");
    }
}
