//! `aapt dump xmltree` parsing
//!
//! The dump is an indented tree of `N:` (namespace), `E:` (element) and `A:`
//! (attribute) lines. Attribute names appear either with a prefix
//! (`android:versionCode(0x0101021b)`) or with the full namespace URI
//! (`http://schemas.android.com/apk/res/android:versionCode(0x0101021b)`); values
//! are quoted strings, typed literals such as `(type 0x10)0xc`, or bare decimals.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use droidrig_core::{Result, RigError};

use crate::manifest::PackageManifest;

/// One element of the dumped tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    /// Local attribute names (namespace stripped) with decoded values
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn descendants_into<'a>(&'a self, out: &mut Vec<&'a XmlElement>) {
        for child in &self.children {
            out.push(child);
            child.descendants_into(out);
        }
    }

    pub fn descendants(&self) -> Vec<&XmlElement> {
        let mut out = Vec::new();
        self.descendants_into(&mut out);
        out
    }
}

fn element_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<indent>\s*)E: (?P<name>[^\s(]+)").expect("static regex"))
}

fn attribute_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<indent>\s*)A: (?P<name>[^=(]+?)(?:\(0x[0-9a-fA-F]+\))?=(?P<value>.*)$")
            .expect("static regex")
    })
}

fn typed_value() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\(type 0x(?P<type>[0-9a-fA-F]+)\)0x(?P<hex>[0-9a-fA-F]+)").expect("static regex")
    })
}

const TYPE_BOOLEAN: u32 = 0x12;

/// Decode an attribute value as aapt prints it.
fn decode_value(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix('"') {
        if let Some(end) = rest.find('"') {
            return rest[..end].to_string();
        }
    }
    if let Some(caps) = typed_value().captures(raw) {
        let kind = u32::from_str_radix(&caps["type"], 16).unwrap_or(0);
        if let Ok(value) = u64::from_str_radix(&caps["hex"], 16) {
            if kind == TYPE_BOOLEAN {
                return (value != 0).to_string();
            }
            return value.to_string();
        }
    }
    // "12 (Raw: ...)" or a bare reference such as @0x7f0e001b
    raw.split_whitespace().next().unwrap_or("").to_string()
}

fn local_name(name: &str) -> &str {
    name.trim().rsplit(':').next().unwrap_or(name)
}

/// Parse the indented dump into a tree rooted at a synthetic document element.
pub fn parse_tree(text: &str) -> XmlElement {
    // (indent, element) from the document root down to the current element
    let mut stack: Vec<(isize, XmlElement)> = vec![(-1, XmlElement::default())];

    let close_to = |stack: &mut Vec<(isize, XmlElement)>, indent: isize| {
        while stack.len() > 1 && stack.last().is_some_and(|(i, _)| *i >= indent) {
            if let Some((_, done)) = stack.pop() {
                if let Some((_, parent)) = stack.last_mut() {
                    parent.children.push(done);
                }
            }
        }
    };

    for line in text.lines().map(|l| l.trim_end_matches('\r')) {
        if let Some(caps) = element_line().captures(line) {
            let indent = caps["indent"].len() as isize;
            close_to(&mut stack, indent);
            stack.push((
                indent,
                XmlElement {
                    name: caps["name"].to_string(),
                    ..Default::default()
                },
            ));
        } else if let Some(caps) = attribute_line().captures(line) {
            let indent = caps["indent"].len() as isize;
            // attributes belong to the nearest element indented less than them
            close_to(&mut stack, indent);
            if let Some((_, element)) = stack.last_mut() {
                element
                    .attributes
                    .push((local_name(&caps["name"]).to_string(), decode_value(&caps["value"])));
            }
        } else if !line.trim().is_empty() {
            debug!("xmltree: skipping {:?}", line);
        }
    }

    close_to(&mut stack, -1);
    stack.pop().map(|(_, root)| root).unwrap_or_default()
}

/// Whether text looks like an xmltree dump.
pub fn looks_like_xmltree(text: &str) -> bool {
    text.lines().any(|l| element_line().is_match(l))
}

fn is_launcher(component: &XmlElement) -> bool {
    component.children_named("intent-filter").any(|filter| {
        let has = |tag: &str, value: &str| {
            filter
                .children_named(tag)
                .any(|e| e.attr("name") == Some(value))
        };
        has("action", "android.intent.action.MAIN")
            && has("category", "android.intent.category.LAUNCHER")
    })
}

/// Parse an xmltree dump of AndroidManifest.xml.
pub fn parse_xmltree(text: &str) -> Result<PackageManifest> {
    let document = parse_tree(text);
    let manifests: Vec<&XmlElement> = document.children_named("manifest").collect();
    let [root] = manifests.as_slice() else {
        return Err(RigError::parse("manifest element from xmltree dump", text));
    };

    let package = root
        .attr("package")
        .filter(|p| is_package_name(p))
        .ok_or_else(|| RigError::parse("package name from xmltree dump", text))?;

    let mut manifest = PackageManifest::new(package);
    manifest.version_code = root.attr("versionCode").and_then(|v| v.parse().ok());
    manifest.version_name = root.attr("versionName").map(str::to_string);

    if let Some(sdk) = root.children_named("uses-sdk").next() {
        manifest.min_sdk = sdk.attr("minSdkVersion").and_then(|v| v.parse().ok());
        manifest.target_sdk = sdk.attr("targetSdkVersion").and_then(|v| v.parse().ok());
    }

    for element in &root.children {
        if element.name.starts_with("uses-permission") {
            if let Some(name) = element.attr("name") {
                manifest.add_permission(name);
            }
        }
    }

    let launcher = root
        .children_named("application")
        .flat_map(|app| app.children.iter())
        .filter(|c| c.name == "activity" || c.name == "activity-alias")
        .find(|c| is_launcher(c))
        .and_then(|c| c.attr("name"))
        .map(|name| manifest.qualify_class(name));
    manifest.launchable_activity = launcher;

    Ok(manifest)
}

fn is_package_name(value: &str) -> bool {
    let mut parts = value.split('.');
    parts.all(|p| {
        let mut chars = p.chars();
        chars.next().is_some_and(|c| c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}
