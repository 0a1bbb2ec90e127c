//! The XML payload: parsing into a tree and writing a tree out.
//!
//! Parsing happens in two passes. The document is first read into a
//! lightweight element tree, decrypting protected values as their elements
//! close, which is document order. The element tree is then interpreted
//! into a [`Tree`]. Elements we do not model (entry history, custom data,
//! deleted objects) are read so the keystream stays in step, then dropped.

use super::stream::InnerStream;
use crate::error::{CodecError, CodecResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use passdb_model::{
    Binary, BinaryId, BinaryRef, DatabaseVersion, Entry, EntryId, Group, GroupId, Role, StringField,
    Times, Tree,
};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::{Read, Write};
use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

// ----------------------------------------------------------------------
// Element tree
// ----------------------------------------------------------------------

/// One XML element with its attributes, text and children.
#[derive(Debug, Default)]
pub(crate) struct XmlNode {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn from_start(start: &BytesStart<'_>) -> CodecResult<Self> {
        let mut node = Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attrs: Vec::new(),
            text: String::new(),
            children: Vec::new(),
        };
        for attr in start.attributes() {
            let attr = attr.map_err(|e| CodecError::corrupt(format!("xml attribute: {e}")))?;
            let value = attr
                .unescape_value()
                .map_err(|e| CodecError::corrupt(format!("xml attribute: {e}")))?;
            node.attrs.push((
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                value.into_owned(),
            ));
        }
        Ok(node)
    }

    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn child_text(&self, name: &str) -> &str {
        self.child(name).map_or("", |c| c.text.as_str())
    }

    fn is_true(&self, attr: &str) -> bool {
        self.attr(attr).is_some_and(parse_bool)
    }
}

impl Drop for XmlNode {
    fn drop(&mut self) {
        self.text.zeroize();
    }
}

/// Parses `xml`, decrypting every `Protected="True"` value with `stream`.
pub(crate) fn parse(xml: &str, stream: &mut InnerStream) -> CodecResult<XmlNode> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| CodecError::corrupt(format!("xml at {}: {e}", reader.buffer_position())))?;
        match event {
            Event::Start(start) => stack.push(XmlNode::from_start(&start)?),
            Event::Empty(start) => {
                let node = XmlNode::from_start(&start)?;
                close(node, &mut stack, &mut root, stream)?;
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    let text = text
                        .unescape()
                        .map_err(|e| CodecError::corrupt(format!("xml text: {e}")))?;
                    top.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| CodecError::corrupt("unbalanced xml end tag"))?;
                close(node, &mut stack, &mut root, stream)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(CodecError::corrupt("xml document ended inside an element"));
    }
    root.ok_or_else(|| CodecError::corrupt("empty xml document"))
}

fn close(
    mut node: XmlNode,
    stack: &mut Vec<XmlNode>,
    root: &mut Option<XmlNode>,
    stream: &mut InnerStream,
) -> CodecResult<()> {
    if node.is_true("Protected") {
        let mut bytes = Zeroizing::new(
            STANDARD
                .decode(node.text.trim())
                .map_err(|_| CodecError::corrupt(format!("protected <{}> is not base64", node.name)))?,
        );
        stream.apply(&mut bytes);
        let plain = std::str::from_utf8(&bytes)
            .map_err(|_| CodecError::corrupt(format!("protected <{}> is not UTF-8", node.name)))?;
        node.text.zeroize();
        node.text.push_str(plain);
    }
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => return Err(CodecError::corrupt("more than one xml root element")),
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Interpretation
// ----------------------------------------------------------------------

/// Builds a tree from a parsed document.
///
/// `header_hash` is checked against `Meta/HeaderHash` when the document
/// carries one.
pub(crate) fn build_tree(document: &XmlNode, header_hash: &[u8; 32]) -> CodecResult<Tree> {
    if document.name != "KeePassFile" {
        return Err(CodecError::corrupt(format!(
            "unexpected root element <{}>",
            document.name
        )));
    }
    let empty = XmlNode::default();
    let meta = document.child("Meta").unwrap_or(&empty);

    let stored_hash = meta.child_text("HeaderHash").trim();
    if !stored_hash.is_empty() {
        let stored = STANDARD
            .decode(stored_hash)
            .map_err(|_| CodecError::corrupt("header hash is not base64"))?;
        if stored.as_slice() != header_hash {
            return Err(CodecError::corrupt("header hash mismatch"));
        }
    }

    let root_node = document
        .child("Root")
        .and_then(|r| r.child("Group"))
        .ok_or_else(|| CodecError::corrupt("missing root group"))?;
    let mut tree = Tree::with_root(DatabaseVersion::V4, read_group(root_node)?);

    if let Some(binaries) = meta.child("Binaries") {
        for node in binaries.children_named("Binary") {
            let id = node
                .attr("ID")
                .and_then(|v| v.trim().parse::<u32>().ok())
                .ok_or_else(|| CodecError::corrupt("pool binary without a numeric ID"))?;
            let compressed = node.is_true("Compressed");
            let raw = STANDARD
                .decode(node.text.trim())
                .map_err(|_| CodecError::corrupt(format!("binary {id} is not base64")))?;
            let data = if compressed { gunzip(&raw)? } else { raw };
            tree.attachments_mut()
                .insert_with_id(BinaryId::new(id), Binary::new(data, compressed))?;
        }
    }

    let root = tree.root_id();
    read_children(&mut tree, root, root_node)?;

    {
        let meta_out = tree.meta_mut();
        meta_out.generator = meta.child_text("Generator").to_string();
        meta_out.database_name = meta.child_text("DatabaseName").to_string();
        meta_out.recycle_bin_enabled = meta
            .child("RecycleBinEnabled")
            .map_or(true, |n| parse_bool(n.text.trim()));
    }
    assign_role(&mut tree, Role::Trash, meta.child_text("RecycleBinUUID"))?;
    assign_role(&mut tree, Role::Template, meta.child_text("EntryTemplatesGroup"))?;

    Ok(tree)
}

fn read_children(tree: &mut Tree, parent: GroupId, node: &XmlNode) -> CodecResult<()> {
    for child in &node.children {
        match child.name.as_str() {
            "Entry" => {
                tree.add_entry(parent, read_entry(child)?)?;
            }
            "Group" => {
                let id = tree.add_group(parent, read_group(child)?)?;
                read_children(tree, id, child)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn read_group(node: &XmlNode) -> CodecResult<Group> {
    let id = GroupId::from_bytes(read_uuid(node.child_text("UUID"))?);
    Ok(Group::new(id, node.child_text("Name"))
        .with_notes(node.child_text("Notes"))
        .with_icon(read_icon(node)?)
        .with_times(read_times(node.child("Times"))?))
}

fn read_entry(node: &XmlNode) -> CodecResult<Entry> {
    let id = EntryId::from_bytes(read_uuid(node.child_text("UUID"))?);
    let mut entry = Entry::new(id)
        .with_icon(read_icon(node)?)
        .with_times(read_times(node.child("Times"))?);

    for child in &node.children {
        match child.name.as_str() {
            "String" => {
                let value = child.child("Value");
                let protected = value
                    .is_some_and(|v| v.is_true("Protected") || v.is_true("ProtectInMemory"));
                entry = entry.with_field(StringField::new(
                    child.child_text("Key"),
                    value.map_or("", |v| v.text.as_str()),
                    protected,
                ));
            }
            "Binary" => {
                let reference = child
                    .child("Value")
                    .and_then(|v| v.attr("Ref"))
                    .and_then(|r| r.trim().parse::<u32>().ok())
                    .ok_or_else(|| {
                        CodecError::corrupt(format!("entry {id} has a binary without a Ref"))
                    })?;
                entry = entry.with_attachment(BinaryRef::new(
                    child.child_text("Key"),
                    BinaryId::new(reference),
                ));
            }
            "History" => debug!(entry = %id, "dropping entry history"),
            _ => {}
        }
    }
    Ok(entry)
}

fn read_uuid(text: &str) -> CodecResult<[u8; 16]> {
    let bytes = STANDARD
        .decode(text.trim())
        .map_err(|_| CodecError::corrupt(format!("malformed UUID '{text}'")))?;
    <[u8; 16]>::try_from(bytes.as_slice())
        .map_err(|_| CodecError::corrupt(format!("malformed UUID '{text}'")))
}

fn read_icon(node: &XmlNode) -> CodecResult<u32> {
    let text = node.child_text("IconID").trim();
    if text.is_empty() {
        return Ok(0);
    }
    text.parse()
        .map_err(|_| CodecError::corrupt(format!("invalid icon id '{text}'")))
}

fn read_times(node: Option<&XmlNode>) -> CodecResult<Times> {
    let Some(node) = node else {
        return Ok(Times::now());
    };
    let creation = read_time(node, "CreationTime")?.unwrap_or_else(Utc::now);
    let mut times = Times::at(creation);
    if let Some(at) = read_time(node, "LastModificationTime")? {
        times.last_modification = at;
    }
    if let Some(at) = read_time(node, "LastAccessTime")? {
        times.last_access = at;
    }
    if parse_bool(node.child_text("Expires").trim()) {
        times.expiry = read_time(node, "ExpiryTime")?;
    }
    Ok(times)
}

fn read_time(node: &XmlNode, name: &str) -> CodecResult<Option<DateTime<Utc>>> {
    let text = node.child_text(name).trim();
    if text.is_empty() {
        return Ok(None);
    }
    let at = DateTime::parse_from_rfc3339(text)
        .map_err(|_| CodecError::corrupt(format!("invalid {name} '{text}'")))?;
    Ok(Some(Times::at(at.with_timezone(&Utc)).creation))
}

fn assign_role(tree: &mut Tree, role: Role, text: &str) -> CodecResult<()> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(());
    }
    let id = GroupId::from_bytes(read_uuid(text)?);
    if id == GroupId::from_bytes([0; 16]) {
        return Ok(());
    }
    if tree.find_group(id).is_none() || id == tree.root_id() {
        warn!(?role, group = %id, "role points at a group that cannot hold it, ignoring");
        return Ok(());
    }
    tree.set_role(role, Some(id))?;
    Ok(())
}

fn parse_bool(text: &str) -> bool {
    text.eq_ignore_ascii_case("true")
}

// ----------------------------------------------------------------------
// Writing
// ----------------------------------------------------------------------

/// How protected values are written.
pub(crate) enum Protection<'a> {
    /// XOR with the inner stream and base64, as stored in a file.
    Stream(&'a mut InnerStream),
    /// Plain text flagged `ProtectInMemory`, as in an export.
    Plain,
}

struct XmlOut<'a> {
    writer: Writer<Vec<u8>>,
    protection: Protection<'a>,
}

impl XmlOut<'_> {
    fn write(&mut self, event: Event<'_>) -> CodecResult<()> {
        self.writer
            .write_event(event)
            .map_err(|e| CodecError::encoding(format!("xml: {e}")))
    }

    fn start(&mut self, name: &str) -> CodecResult<()> {
        self.write(Event::Start(BytesStart::new(name)))
    }

    fn end(&mut self, name: &str) -> CodecResult<()> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    fn leaf_with(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> CodecResult<()> {
        let start = BytesStart::new(name).with_attributes(attrs.iter().copied());
        if text.is_empty() {
            return self.write(Event::Empty(start));
        }
        self.write(Event::Start(start))?;
        self.write(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    fn leaf(&mut self, name: &str, text: &str) -> CodecResult<()> {
        self.leaf_with(name, &[], text)
    }

    fn uuid(&mut self, name: &str, bytes: &[u8; 16]) -> CodecResult<()> {
        self.leaf(name, &STANDARD.encode(bytes))
    }

    fn time(&mut self, name: &str, at: DateTime<Utc>) -> CodecResult<()> {
        self.leaf(name, &at.format(TIME_FORMAT).to_string())
    }

    fn bool(&mut self, name: &str, value: bool) -> CodecResult<()> {
        self.leaf(name, if value { "True" } else { "False" })
    }

    fn protected_value(&mut self, value: &str) -> CodecResult<()> {
        let encoded = match &mut self.protection {
            Protection::Stream(stream) => {
                let mut bytes = Zeroizing::new(value.as_bytes().to_vec());
                stream.apply(&mut bytes);
                STANDARD.encode(bytes.as_slice())
            }
            Protection::Plain => {
                return self.leaf_with("Value", &[("ProtectInMemory", "True")], value);
            }
        };
        self.leaf_with("Value", &[("Protected", "True")], &encoded)
    }

    fn is_plain(&self) -> bool {
        matches!(self.protection, Protection::Plain)
    }
}

/// Writes the whole document.
pub(crate) fn write_document(
    tree: &Tree,
    header_hash: Option<&[u8; 32]>,
    protection: Protection<'_>,
) -> CodecResult<Zeroizing<Vec<u8>>> {
    let mut out = XmlOut {
        writer: Writer::new_with_indent(Vec::new(), b'\t', 1),
        protection,
    };
    out.write(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), Some("yes"))))?;
    out.start("KeePassFile")?;
    write_meta(&mut out, tree, header_hash)?;
    out.start("Root")?;
    write_group(&mut out, tree, tree.root())?;
    out.end("Root")?;
    out.end("KeePassFile")?;
    Ok(Zeroizing::new(out.writer.into_inner()))
}

fn write_meta(out: &mut XmlOut<'_>, tree: &Tree, header_hash: Option<&[u8; 32]>) -> CodecResult<()> {
    let meta = tree.meta();
    let nil = [0u8; 16];
    out.start("Meta")?;
    out.leaf("Generator", &meta.generator)?;
    if let Some(hash) = header_hash {
        out.leaf("HeaderHash", &STANDARD.encode(hash))?;
    }
    out.leaf("DatabaseName", &meta.database_name)?;
    out.bool("RecycleBinEnabled", meta.recycle_bin_enabled)?;
    let trash = tree.trash().map(|g| *g.as_bytes()).unwrap_or(nil);
    out.uuid("RecycleBinUUID", &trash)?;
    let template = tree.template().map(|g| *g.as_bytes()).unwrap_or(nil);
    out.uuid("EntryTemplatesGroup", &template)?;

    out.start("Binaries")?;
    for (id, binary) in tree.attachments().iter() {
        let id_text = id.as_u32().to_string();
        if binary.is_compressed() && !out.is_plain() {
            let packed = gzip(binary.data())?;
            out.leaf_with(
                "Binary",
                &[("ID", id_text.as_str()), ("Compressed", "True")],
                &STANDARD.encode(packed),
            )?;
        } else {
            out.leaf_with(
                "Binary",
                &[("ID", id_text.as_str())],
                &STANDARD.encode(binary.data()),
            )?;
        }
    }
    out.end("Binaries")?;
    out.end("Meta")
}

fn write_times(out: &mut XmlOut<'_>, times: &Times) -> CodecResult<()> {
    out.start("Times")?;
    out.time("CreationTime", times.creation)?;
    out.time("LastModificationTime", times.last_modification)?;
    out.time("LastAccessTime", times.last_access)?;
    out.time("ExpiryTime", times.expiry.unwrap_or(times.creation))?;
    out.bool("Expires", times.expiry.is_some())?;
    out.end("Times")
}

fn write_group(out: &mut XmlOut<'_>, tree: &Tree, group: &Group) -> CodecResult<()> {
    out.start("Group")?;
    out.uuid("UUID", group.id().as_bytes())?;
    out.leaf("Name", group.name())?;
    out.leaf("Notes", group.notes())?;
    out.leaf("IconID", &group.icon().to_string())?;
    write_times(out, group.times())?;
    for entry_id in group.entries() {
        let entry = tree.entry(*entry_id).map_err(|e| CodecError::encoding(e.to_string()))?;
        write_entry(out, entry)?;
    }
    for child_id in group.groups() {
        let child = tree.group(*child_id).map_err(|e| CodecError::encoding(e.to_string()))?;
        write_group(out, tree, child)?;
    }
    out.end("Group")
}

fn write_entry(out: &mut XmlOut<'_>, entry: &Entry) -> CodecResult<()> {
    out.start("Entry")?;
    out.uuid("UUID", entry.id().as_bytes())?;
    out.leaf("IconID", &entry.icon().to_string())?;
    write_times(out, entry.times())?;
    for field in entry.fields() {
        out.start("String")?;
        out.leaf("Key", field.key())?;
        if field.is_protected() {
            out.protected_value(field.value())?;
        } else {
            out.leaf("Value", field.value())?;
        }
        out.end("String")?;
    }
    for reference in entry.attachments() {
        out.start("Binary")?;
        out.leaf("Key", &reference.name)?;
        let id_text = reference.id.as_u32().to_string();
        out.leaf_with("Value", &[("Ref", id_text.as_str())], "")?;
        out.end("Binary")?;
    }
    out.end("Entry")
}

// ----------------------------------------------------------------------
// Compression
// ----------------------------------------------------------------------

/// Gzip-compresses `data`.
pub(crate) fn gzip(data: &[u8]) -> CodecResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CodecError::encoding(format!("gzip: {e}")))?;
    encoder
        .finish()
        .map_err(|e| CodecError::encoding(format!("gzip: {e}")))
}

/// Inflates gzip `data`.
pub(crate) fn gunzip(data: &[u8]) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| CodecError::corrupt(format!("gzip: {e}")))?;
    Ok(out)
}
