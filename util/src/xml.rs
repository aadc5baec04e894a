use std::io::{BufRead, Cursor, Write};

pub use quick_xml::{events, Reader, Writer};

use events::{BytesStart, BytesText, Event};

pub trait ToXml {
    fn to_xml<W: Write>(&self, writer: &mut Writer<W>) -> quick_xml::Result<()>;

    fn to_bytes(&self) -> quick_xml::Result<Vec<u8>> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        self.to_xml(&mut writer)?;
        Ok(writer.into_inner().into_inner())
    }
}

/// A small owned element tree, used for header blocks and response bodies.
///
/// Names are kept exactly as written, prefix included.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<XmlElement>,
}

fn local(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn local_name(&self) -> &str {
        local(&self.name)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name || local(key) == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// First child with the given local name.
    pub fn child(&self, local_name: &str) -> Option<&XmlElement> {
        self.children
            .iter()
            .find(|child| child.local_name() == local_name)
    }

    /// Namespace bound to this element's prefix by its own declarations.
    pub fn declared_namespace(&self) -> Option<&str> {
        let declaration = match self.name.split_once(':') {
            Some((prefix, _)) => format!("xmlns:{}", prefix),
            None => "xmlns".to_owned(),
        };

        self.attributes
            .iter()
            .find(|(key, _)| *key == declaration)
            .map(|(_, value)| value.as_str())
    }

    pub fn render(&self) -> quick_xml::Result<String> {
        let bytes = self.to_bytes()?;
        String::from_utf8(bytes).map_err(|err| quick_xml::Error::Utf8(err.utf8_error()))
    }

    /// Reads the first element of a document into a tree.
    pub fn parse<R: BufRead>(input: R) -> quick_xml::Result<Self> {
        let mut reader = Reader::from_reader(input);
        reader.trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut buffer = Vec::new();

        loop {
            match reader.read_event(&mut buffer)? {
                Event::Start(start) => stack.push(Self::from_start(&reader, &start)?),

                Event::Empty(start) => {
                    let element = Self::from_start(&reader, &start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => return Ok(element),
                    }
                }

                Event::End(..) => {
                    if let Some(element) = stack.pop() {
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(element),
                            None => return Ok(element),
                        }
                    }
                }

                Event::Text(text) => {
                    if let Some(element) = stack.last_mut() {
                        let text = text.unescape_and_decode(&reader)?;
                        element.text.get_or_insert_with(String::new).push_str(&text);
                    }
                }

                Event::CData(data) => {
                    if let Some(element) = stack.last_mut() {
                        let text = data.unescape_and_decode(&reader)?;
                        element.text.get_or_insert_with(String::new).push_str(&text);
                    }
                }

                Event::Eof => {
                    return Err(quick_xml::Error::UnexpectedEof(
                        "document has no root element".into(),
                    ))
                }

                _ => (),
            }

            buffer.clear();
        }
    }

    fn from_start<B: BufRead>(reader: &Reader<B>, start: &BytesStart) -> quick_xml::Result<Self> {
        let mut element = Self::new(reader.decode(start.name())?);

        for attribute in start.attributes() {
            let attribute = attribute?;
            let key = reader.decode(attribute.key)?.to_owned();
            let value = attribute.unescape_and_decode_value(reader)?;
            element.attributes.push((key, value));
        }

        Ok(element)
    }
}

impl ToXml for XmlElement {
    fn to_xml<W: Write>(&self, writer: &mut Writer<W>) -> quick_xml::Result<()> {
        let mut start = BytesStart::owned_name(self.name.as_bytes());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if self.text.is_none() && self.children.is_empty() {
            return writer.write_event(Event::Empty(start));
        }

        writer.write_event(Event::Start(start.to_borrowed()))?;

        if let Some(text) = &self.text {
            writer.write_event(Event::Text(BytesText::from_plain_str(text)))?;
        }

        for child in &self.children {
            child.to_xml(writer)?;
        }

        writer.write_event(Event::End(start.to_end()))
    }
}
