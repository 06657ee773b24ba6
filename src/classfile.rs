//! Static class-file parsing.
//!
//! The annotation index is built by parsing class bytes directly; classes from
//! a deployed archive are never executed or reflected over by the host. Only
//! the pieces the index needs are decoded: the constant pool, the class/super
//! names, and `RuntimeVisibleAnnotations` on classes, fields and methods.

use serde_json::{json, Value};
use thiserror::Error;

const MAGIC: u32 = 0xCAFE_BABE;
const RUNTIME_VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";

/// Error raised while decoding class bytes. Any of these marks the entry as
/// malformed; callers decide whether that is fatal (loading) or skippable
/// (index building).
#[derive(Debug, Error)]
pub enum ClassFileError {
    #[error("truncated class file at offset {0}")]
    Truncated(usize),
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),
    #[error("unknown constant pool tag {0}")]
    BadConstantTag(u8),
    #[error("constant pool index {0} out of range or wrong kind")]
    BadConstantIndex(u16),
    #[error("invalid UTF-8 in constant pool")]
    BadUtf8,
    #[error("unknown element value tag {0:?}")]
    BadElementTag(char),
}

/// One annotation occurrence with its decoded attribute values.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationUse {
    /// Dotted annotation type name, e.g. `jakarta.servlet.annotation.WebServlet`.
    pub type_name: String,
    /// Attribute name/value pairs as a JSON object.
    pub values: Value,
}

/// The statically decoded shape of one class.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    /// Dotted binary name from `this_class`.
    pub binary_name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub access_flags: u16,
    pub annotations: Vec<AnnotationUse>,
    /// (field name, annotations) for fields carrying runtime-visible annotations.
    pub field_annotations: Vec<(String, Vec<AnnotationUse>)>,
    /// (method name, annotations) for methods carrying runtime-visible annotations.
    pub method_annotations: Vec<(String, Vec<AnnotationUse>)>,
}

#[derive(Debug, Clone)]
enum Const {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    // Everything else is skipped over but keeps its pool slot.
    Other,
}

struct Pool(Vec<Const>);

impl Pool {
    fn get(&self, index: u16) -> Result<&Const, ClassFileError> {
        self.0
            .get(index as usize)
            .ok_or(ClassFileError::BadConstantIndex(index))
    }

    fn utf8(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.get(index)? {
            Const::Utf8(s) => Ok(s),
            _ => Err(ClassFileError::BadConstantIndex(index)),
        }
    }

    fn class_name(&self, index: u16) -> Result<String, ClassFileError> {
        match self.get(index)? {
            Const::Class(name_index) => Ok(self.utf8(*name_index)?.replace('/', ".")),
            _ => Err(ClassFileError::BadConstantIndex(index)),
        }
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ClassFileError> {
        if self.pos + n > self.bytes.len() {
            return Err(ClassFileError::Truncated(self.pos));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u1(&mut self) -> Result<u8, ClassFileError> {
        Ok(self.take(1)?[0])
    }

    fn u2(&mut self) -> Result<u16, ClassFileError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u4(&mut self) -> Result<u32, ClassFileError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u8v(&mut self) -> Result<u64, ClassFileError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}

/// Decode class bytes into a [`ClassInfo`].
pub fn parse(bytes: &[u8]) -> Result<ClassInfo, ClassFileError> {
    let mut cur = Cursor::new(bytes);
    let magic = cur.u4()?;
    if magic != MAGIC {
        return Err(ClassFileError::BadMagic(magic));
    }
    let _minor = cur.u2()?;
    let _major = cur.u2()?;

    let pool = read_pool(&mut cur)?;

    let access_flags = cur.u2()?;
    let this_class = cur.u2()?;
    let super_class = cur.u2()?;
    let binary_name = pool.class_name(this_class)?;
    let super_name = if super_class == 0 {
        None
    } else {
        Some(pool.class_name(super_class)?)
    };

    let interface_count = cur.u2()?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        interfaces.push(pool.class_name(cur.u2()?)?);
    }

    let field_annotations = read_members(&mut cur, &pool)?;
    let method_annotations = read_members(&mut cur, &pool)?;
    let annotations = read_attributes(&mut cur, &pool)?;

    Ok(ClassInfo {
        binary_name,
        super_name,
        interfaces,
        access_flags,
        annotations,
        field_annotations,
        method_annotations,
    })
}

fn read_pool(cur: &mut Cursor<'_>) -> Result<Pool, ClassFileError> {
    let count = cur.u2()?;
    // Slot 0 is unused; long/double entries occupy two slots.
    let mut pool = vec![Const::Other; count as usize];
    let mut index = 1u16;
    while index < count {
        let tag = cur.u1()?;
        let (entry, wide) = match tag {
            1 => {
                let len = cur.u2()? as usize;
                let raw = cur.take(len)?;
                let s = std::str::from_utf8(raw).map_err(|_| ClassFileError::BadUtf8)?;
                (Const::Utf8(s.to_string()), false)
            }
            3 => (Const::Integer(cur.u4()? as i32), false),
            4 => (Const::Float(f32::from_bits(cur.u4()?)), false),
            5 => (Const::Long(cur.u8v()? as i64), true),
            6 => (Const::Double(f64::from_bits(cur.u8v()?)), true),
            7 => (Const::Class(cur.u2()?), false),
            8 | 16 | 19 | 20 => {
                let _ = cur.u2()?;
                (Const::Other, false)
            }
            9 | 10 | 11 | 12 | 17 | 18 => {
                let _ = cur.u2()?;
                let _ = cur.u2()?;
                (Const::Other, false)
            }
            15 => {
                let _ = cur.u1()?;
                let _ = cur.u2()?;
                (Const::Other, false)
            }
            other => return Err(ClassFileError::BadConstantTag(other)),
        };
        pool[index as usize] = entry;
        index += if wide { 2 } else { 1 };
    }
    Ok(Pool(pool))
}

/// Read a fields/methods table, returning (member name, annotations) for
/// members that carry runtime-visible annotations.
fn read_members(
    cur: &mut Cursor<'_>,
    pool: &Pool,
) -> Result<Vec<(String, Vec<AnnotationUse>)>, ClassFileError> {
    let count = cur.u2()?;
    let mut out = Vec::new();
    for _ in 0..count {
        let _access = cur.u2()?;
        let name_index = cur.u2()?;
        let _descriptor_index = cur.u2()?;
        let annotations = read_attributes(cur, pool)?;
        if !annotations.is_empty() {
            out.push((pool.utf8(name_index)?.to_string(), annotations));
        }
    }
    Ok(out)
}

/// Read an attributes table, decoding only `RuntimeVisibleAnnotations`.
fn read_attributes(
    cur: &mut Cursor<'_>,
    pool: &Pool,
) -> Result<Vec<AnnotationUse>, ClassFileError> {
    let count = cur.u2()?;
    let mut annotations = Vec::new();
    for _ in 0..count {
        let name_index = cur.u2()?;
        let length = cur.u4()? as usize;
        let body = cur.take(length)?;
        if pool.utf8(name_index)? == RUNTIME_VISIBLE_ANNOTATIONS {
            let mut inner = Cursor::new(body);
            let num = inner.u2()?;
            for _ in 0..num {
                annotations.push(read_annotation(&mut inner, pool)?);
            }
        }
    }
    Ok(annotations)
}

fn read_annotation(cur: &mut Cursor<'_>, pool: &Pool) -> Result<AnnotationUse, ClassFileError> {
    let type_index = cur.u2()?;
    let type_name = descriptor_to_name(pool.utf8(type_index)?);
    let num_pairs = cur.u2()?;
    let mut values = serde_json::Map::new();
    for _ in 0..num_pairs {
        let name_index = cur.u2()?;
        let name = pool.utf8(name_index)?.to_string();
        let value = read_element_value(cur, pool)?;
        values.insert(name, value);
    }
    Ok(AnnotationUse {
        type_name,
        values: Value::Object(values),
    })
}

fn read_element_value(cur: &mut Cursor<'_>, pool: &Pool) -> Result<Value, ClassFileError> {
    let tag = cur.u1()? as char;
    let value = match tag {
        'B' | 'C' | 'I' | 'S' => match pool.get(cur.u2()?)? {
            Const::Integer(i) => json!(i),
            _ => return Err(ClassFileError::BadElementTag(tag)),
        },
        'Z' => match pool.get(cur.u2()?)? {
            Const::Integer(i) => json!(*i != 0),
            _ => return Err(ClassFileError::BadElementTag(tag)),
        },
        'J' => match pool.get(cur.u2()?)? {
            Const::Long(l) => json!(l),
            _ => return Err(ClassFileError::BadElementTag(tag)),
        },
        'F' => match pool.get(cur.u2()?)? {
            Const::Float(f) => json!(f),
            _ => return Err(ClassFileError::BadElementTag(tag)),
        },
        'D' => match pool.get(cur.u2()?)? {
            Const::Double(d) => json!(d),
            _ => return Err(ClassFileError::BadElementTag(tag)),
        },
        's' => json!(pool.utf8(cur.u2()?)?),
        'e' => {
            let type_name = descriptor_to_name(pool.utf8(cur.u2()?)?);
            let const_name = pool.utf8(cur.u2()?)?;
            json!(format!("{type_name}.{const_name}"))
        }
        'c' => json!(descriptor_to_name(pool.utf8(cur.u2()?)?)),
        '@' => {
            let nested = read_annotation(cur, pool)?;
            json!({ "type": nested.type_name, "values": nested.values })
        }
        '[' => {
            let num = cur.u2()?;
            let mut items = Vec::with_capacity(num as usize);
            for _ in 0..num {
                items.push(read_element_value(cur, pool)?);
            }
            Value::Array(items)
        }
        other => return Err(ClassFileError::BadElementTag(other)),
    };
    Ok(value)
}

/// `Ljakarta/servlet/Foo;` → `jakarta.servlet.Foo`; bare names pass through.
fn descriptor_to_name(descriptor: &str) -> String {
    let inner = descriptor
        .strip_prefix('L')
        .and_then(|s| s.strip_suffix(';'))
        .unwrap_or(descriptor);
    inner.replace('/', ".")
}

pub mod builder {
    //! Synthesizes minimal, valid class bytes.
    //!
    //! Used by test fixtures and the `caribe index` tooling path to produce
    //! archives with annotated classes without a JVM toolchain on hand.

    use serde_json::Value;

    enum PoolEntry {
        Utf8(String),
        Integer(i32),
        Class(u16),
    }

    /// Builds class bytes for a class with optional runtime-visible
    /// annotations on the class itself and on named methods.
    pub struct ClassBytesBuilder {
        binary_name: String,
        super_name: String,
        annotations: Vec<(String, Vec<(String, Value)>)>,
        methods: Vec<(String, Vec<(String, Vec<(String, Value)>)>)>,
    }

    impl ClassBytesBuilder {
        pub fn new(binary_name: &str) -> Self {
            Self {
                binary_name: binary_name.to_string(),
                super_name: "java.lang.Object".to_string(),
                annotations: Vec::new(),
                methods: Vec::new(),
            }
        }

        pub fn super_class(mut self, name: &str) -> Self {
            self.super_name = name.to_string();
            self
        }

        /// Add a class-level annotation with attribute values. Supported
        /// values: strings, integers, booleans, and arrays of strings.
        pub fn annotate(mut self, type_name: &str, values: Vec<(String, Value)>) -> Self {
            self.annotations.push((type_name.to_string(), values));
            self
        }

        /// Add a method carrying the given annotations.
        pub fn method(
            mut self,
            name: &str,
            annotations: Vec<(String, Vec<(String, Value)>)>,
        ) -> Self {
            self.methods.push((name.to_string(), annotations));
            self
        }

        pub fn build(self) -> Vec<u8> {
            let mut pool = Pool::new();
            let this_class = pool.class(&self.binary_name);
            let super_class = pool.class(&self.super_name);
            let rva = pool.utf8(super::RUNTIME_VISIBLE_ANNOTATIONS);

            let class_attr = encode_annotations(&mut pool, &self.annotations);
            let methods: Vec<(u16, u16, Option<Vec<u8>>)> = self
                .methods
                .iter()
                .map(|(name, anns)| {
                    let name_index = pool.utf8(name);
                    let desc_index = pool.utf8("()V");
                    let attr = encode_annotations(&mut pool, anns);
                    (name_index, desc_index, attr)
                })
                .collect();

            let mut out = Vec::new();
            out.extend_from_slice(&super::MAGIC.to_be_bytes());
            out.extend_from_slice(&0u16.to_be_bytes()); // minor
            out.extend_from_slice(&61u16.to_be_bytes()); // major (Java 17)
            pool.encode(&mut out);
            out.extend_from_slice(&0x0021u16.to_be_bytes()); // ACC_PUBLIC | ACC_SUPER
            out.extend_from_slice(&this_class.to_be_bytes());
            out.extend_from_slice(&super_class.to_be_bytes());
            out.extend_from_slice(&0u16.to_be_bytes()); // interfaces
            out.extend_from_slice(&0u16.to_be_bytes()); // fields

            out.extend_from_slice(&(methods.len() as u16).to_be_bytes());
            for (name_index, desc_index, attr) in methods {
                out.extend_from_slice(&0x0001u16.to_be_bytes());
                out.extend_from_slice(&name_index.to_be_bytes());
                out.extend_from_slice(&desc_index.to_be_bytes());
                write_attr_table(&mut out, rva, attr);
            }

            write_attr_table(&mut out, rva, class_attr);
            out
        }
    }

    fn write_attr_table(out: &mut Vec<u8>, rva_index: u16, attr: Option<Vec<u8>>) {
        match attr {
            Some(body) => {
                out.extend_from_slice(&1u16.to_be_bytes());
                out.extend_from_slice(&rva_index.to_be_bytes());
                out.extend_from_slice(&(body.len() as u32).to_be_bytes());
                out.extend_from_slice(&body);
            }
            None => out.extend_from_slice(&0u16.to_be_bytes()),
        }
    }

    fn encode_annotations(
        pool: &mut Pool,
        annotations: &[(String, Vec<(String, Value)>)],
    ) -> Option<Vec<u8>> {
        if annotations.is_empty() {
            return None;
        }
        let mut body = Vec::new();
        body.extend_from_slice(&(annotations.len() as u16).to_be_bytes());
        for (type_name, values) in annotations {
            let descriptor = format!("L{};", type_name.replace('.', "/"));
            let type_index = pool.utf8(&descriptor);
            body.extend_from_slice(&type_index.to_be_bytes());
            body.extend_from_slice(&(values.len() as u16).to_be_bytes());
            for (name, value) in values {
                let name_index = pool.utf8(name);
                body.extend_from_slice(&name_index.to_be_bytes());
                encode_element_value(pool, &mut body, value);
            }
        }
        Some(body)
    }

    fn encode_element_value(pool: &mut Pool, out: &mut Vec<u8>, value: &Value) {
        match value {
            Value::String(s) => {
                out.push(b's');
                let index = pool.utf8(s);
                out.extend_from_slice(&index.to_be_bytes());
            }
            Value::Bool(b) => {
                out.push(b'Z');
                let index = pool.integer(i32::from(*b));
                out.extend_from_slice(&index.to_be_bytes());
            }
            Value::Number(n) => {
                out.push(b'I');
                let index = pool.integer(n.as_i64().unwrap_or(0) as i32);
                out.extend_from_slice(&index.to_be_bytes());
            }
            Value::Array(items) => {
                out.push(b'[');
                out.extend_from_slice(&(items.len() as u16).to_be_bytes());
                for item in items {
                    encode_element_value(pool, out, item);
                }
            }
            // Nulls and objects have no class-file encoding here; emit an
            // empty string so the entry stays structurally valid.
            _ => {
                out.push(b's');
                let index = pool.utf8("");
                out.extend_from_slice(&index.to_be_bytes());
            }
        }
    }

    struct Pool {
        entries: Vec<PoolEntry>,
    }

    impl Pool {
        fn new() -> Self {
            Self {
                entries: Vec::new(),
            }
        }

        fn utf8(&mut self, s: &str) -> u16 {
            for (i, entry) in self.entries.iter().enumerate() {
                if let PoolEntry::Utf8(existing) = entry {
                    if existing == s {
                        return (i + 1) as u16;
                    }
                }
            }
            self.entries.push(PoolEntry::Utf8(s.to_string()));
            self.entries.len() as u16
        }

        fn integer(&mut self, v: i32) -> u16 {
            for (i, entry) in self.entries.iter().enumerate() {
                if let PoolEntry::Integer(existing) = entry {
                    if *existing == v {
                        return (i + 1) as u16;
                    }
                }
            }
            self.entries.push(PoolEntry::Integer(v));
            self.entries.len() as u16
        }

        fn class(&mut self, dotted: &str) -> u16 {
            let name_index = self.utf8(&dotted.replace('.', "/"));
            self.entries.push(PoolEntry::Class(name_index));
            self.entries.len() as u16
        }

        fn encode(&self, out: &mut Vec<u8>) {
            out.extend_from_slice(&((self.entries.len() + 1) as u16).to_be_bytes());
            for entry in &self.entries {
                match entry {
                    PoolEntry::Utf8(s) => {
                        out.push(1);
                        out.extend_from_slice(&(s.len() as u16).to_be_bytes());
                        out.extend_from_slice(s.as_bytes());
                    }
                    PoolEntry::Integer(v) => {
                        out.push(3);
                        out.extend_from_slice(&v.to_be_bytes());
                    }
                    PoolEntry::Class(name_index) => {
                        out.push(7);
                        out.extend_from_slice(&name_index.to_be_bytes());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::builder::ClassBytesBuilder;
    use super::*;

    #[test]
    fn parses_plain_class() {
        let bytes = ClassBytesBuilder::new("com.example.Plain").build();
        let info = parse(&bytes).unwrap();
        assert_eq!(info.binary_name, "com.example.Plain");
        assert_eq!(info.super_name.as_deref(), Some("java.lang.Object"));
        assert!(info.annotations.is_empty());
    }

    #[test]
    fn parses_class_annotation_attributes() {
        let bytes = ClassBytesBuilder::new("com.example.Hello")
            .annotate(
                "jakarta.servlet.annotation.WebServlet",
                vec![
                    ("name".to_string(), json!("hello")),
                    ("urlPatterns".to_string(), json!(["/hello", "/hi"])),
                    ("loadOnStartup".to_string(), json!(1)),
                    ("asyncSupported".to_string(), json!(true)),
                ],
            )
            .build();
        let info = parse(&bytes).unwrap();
        assert_eq!(info.annotations.len(), 1);
        let ann = &info.annotations[0];
        assert_eq!(ann.type_name, "jakarta.servlet.annotation.WebServlet");
        assert_eq!(ann.values["name"], json!("hello"));
        assert_eq!(ann.values["urlPatterns"], json!(["/hello", "/hi"]));
        assert_eq!(ann.values["loadOnStartup"], json!(1));
        assert_eq!(ann.values["asyncSupported"], json!(true));
    }

    #[test]
    fn parses_method_annotations() {
        let bytes = ClassBytesBuilder::new("com.example.WithMethod")
            .method(
                "handler",
                vec![(
                    "com.example.Marker".to_string(),
                    vec![("value".to_string(), json!("x"))],
                )],
            )
            .build();
        let info = parse(&bytes).unwrap();
        assert_eq!(info.method_annotations.len(), 1);
        assert_eq!(info.method_annotations[0].0, "handler");
        assert_eq!(
            info.method_annotations[0].1[0].type_name,
            "com.example.Marker"
        );
    }

    #[test]
    fn rejects_bad_magic() {
        let err = parse(&[0, 0, 0, 0, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, ClassFileError::BadMagic(_)));
    }

    #[test]
    fn rejects_truncated_bytes() {
        let bytes = ClassBytesBuilder::new("com.example.Cut").build();
        for cut in [6, bytes.len() / 2, bytes.len() - 1] {
            assert!(parse(&bytes[..cut]).is_err());
        }
    }
}
