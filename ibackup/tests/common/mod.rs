//! Synthetic backups for integration tests.
//!
//! Every class key in the generated keybags is 32 zero bytes, wrapped under
//! the root key derived from [`PASSWORD`]. Under a zero class key,
//! [`WRAPPED_DATA_KEY`] unwraps to a zero data key, which is what file
//! contents and `Manifest.db` are encrypted with.
#![allow(dead_code)]

use std::num::NonZeroU32;
use std::path::Path;
use std::time::{Duration, SystemTime};

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockEncryptMut, KeyIvInit};
use aes_kw::Kek;
use byteorder::{BigEndian, WriteBytesExt};
use hex_literal::hex;
use plist::{Dictionary, Uid, Value};
use rusqlite::{params, Connection};

use ibackup::manifest_db::mbdb;
use ibackup::tlv::{self, TlvRecord};

pub const PASSWORD: &str = "0000";
pub const MODERN_VERSION: &str = "10.3";
pub const LEGACY_VERSION: &str = "9.0.1";

/// RFC 3394 wrap of a zero data key under a zero class key.
pub const WRAPPED_DATA_KEY: [u8; 40] = hex!(
    "97317494343807e690fd1e431413963dc0e3deb4907fb89fa36ce65126d0ea13"
    "01381fb3a2941e2f"
);
pub const MANIFEST_KEY_CLASS: u32 = 2;
pub const FILE_KEY_CLASS: u32 = 4;
/// Not password protected; never present in the unlocked keybag.
pub const DEVICE_ONLY_CLASS: u32 = 6;

/// `"Test data"` under the zero data key, PKCS7 padded.
pub const TEST_CIPHERTEXT: [u8; 16] = hex!("78B51CA5374C3AD575174288688CDA49");
pub const TEST_PLAINTEXT: &[u8] = b"Test data";

const SALT: [u8; 20] = [0x11; 20];
const ITER: u32 = 10;
const DPSL: [u8; 20] = [0x22; 20];
const DPIC: u32 = 10;

const MTIME: u64 = 0x610a911f;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    File,
    Directory,
}

#[derive(Debug, Clone)]
pub struct FileSpec {
    pub domain: &'static str,
    pub path: &'static str,
    pub kind: Kind,
    /// `None` leaves the content file out of the backup.
    pub content: Option<Vec<u8>>,
    /// Recorded size when it differs from the content length.
    pub declared_size: Option<u64>,
}

impl FileSpec {
    pub fn file(domain: &'static str, path: &'static str, content: &[u8]) -> Self {
        FileSpec {
            domain,
            path,
            kind: Kind::File,
            content: Some(content.to_vec()),
            declared_size: None,
        }
    }

    pub fn missing(domain: &'static str, path: &'static str) -> Self {
        FileSpec {
            domain,
            path,
            kind: Kind::File,
            content: None,
            declared_size: None,
        }
    }

    pub fn dir(domain: &'static str, path: &'static str) -> Self {
        FileSpec {
            domain,
            path,
            kind: Kind::Directory,
            content: None,
            declared_size: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.declared_size = Some(size);
        self
    }

    pub fn size(&self) -> u64 {
        self.declared_size
            .or_else(|| self.content.as_ref().map(|c| c.len() as u64))
            .unwrap_or(0)
    }

    pub fn file_id(&self) -> String {
        mbdb::file_id(self.domain, self.path)
    }

    fn mode(&self) -> u16 {
        match self.kind {
            Kind::File => 0o100644,
            Kind::Directory => 0o040755,
        }
    }
}

/// The usual test tree: a directory, two files in it, a file of another
/// domain at a nested path and a file whose content is missing.
pub fn sample_files() -> Vec<FileSpec> {
    vec![
        FileSpec::dir("MyTestDomain", "Media"),
        FileSpec::file("MyTestDomain", "Media/Test.txt", TEST_PLAINTEXT),
        FileSpec::file("MyTestDomain", "Media/photo.jpg", &[0xFF, 0xD8, 0xFF, 0xE0, 0, 1, 2, 3]),
        FileSpec::file("OtherDomain", "Media/foreign.txt", b"other domain"),
        FileSpec::missing("MyTestDomain", "Media/gone.txt"),
    ]
}

fn wrapped_file_key(class: u32) -> Vec<u8> {
    let mut key = Vec::new();
    key.write_u32::<byteorder::LittleEndian>(class).unwrap();
    key.extend_from_slice(&WRAPPED_DATA_KEY);
    key
}

fn pbkdf2(algorithm: ring::pbkdf2::Algorithm, secret: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut out = [0u8; 32];
    ring::pbkdf2::derive(
        algorithm,
        NonZeroU32::new(iterations).unwrap(),
        salt,
        secret,
        &mut out,
    );
    out
}

pub fn root_key(password: &str, modern: bool) -> [u8; 32] {
    if modern {
        let stretched = pbkdf2(ring::pbkdf2::PBKDF2_HMAC_SHA256, password.as_bytes(), &DPSL, DPIC);
        pbkdf2(ring::pbkdf2::PBKDF2_HMAC_SHA1, &stretched, &SALT, ITER)
    } else {
        pbkdf2(ring::pbkdf2::PBKDF2_HMAC_SHA1, password.as_bytes(), &SALT, ITER)
    }
}

/// Keybag with classes 1 to 10, all holding a zero key.
pub fn keybag(password: &str, modern: bool) -> Vec<u8> {
    let kek = Kek::from(root_key(password, modern));
    let mut wpky = [0u8; 40];
    kek.wrap(&[0u8; 32], &mut wpky).unwrap();

    let mut records = vec![
        TlvRecord::integer(b"VERS", 3),
        TlvRecord::integer(b"TYPE", 1),
        TlvRecord::bytes(b"UUID", &[0xAA; 16]),
        TlvRecord::bytes(b"HMCK", &[0xBB; 40]),
        TlvRecord::integer(b"WRAP", 1),
        TlvRecord::bytes(b"SALT", &SALT),
        TlvRecord::integer(b"ITER", ITER),
    ];
    if modern {
        records.push(TlvRecord::integer(b"DPWT", 1));
        records.push(TlvRecord::integer(b"DPIC", DPIC));
        records.push(TlvRecord::bytes(b"DPSL", &DPSL));
    }
    records.push(TlvRecord::integer(b"CLAS", 11));
    for class in 1..=10u32 {
        let wrap = if class == DEVICE_ONLY_CLASS { 1 } else { 3 };
        records.push(TlvRecord::bytes(b"UUID", &[class as u8; 16]));
        records.push(TlvRecord::integer(b"CLAS", class));
        records.push(TlvRecord::integer(b"WRAP", wrap));
        records.push(TlvRecord::integer(b"KTYP", 0));
        records.push(TlvRecord::bytes(b"WPKY", &wpky));
    }
    tlv::serialize(&records).unwrap()
}

/// AES-256-CBC with the zero data key and IV; `data` must be block aligned.
pub fn encrypt(data: &[u8]) -> Vec<u8> {
    let mut buffer = data.to_vec();
    let len = buffer.len();
    cbc::Encryptor::<aes::Aes256>::new_from_slices(&[0u8; 32], &[0u8; 16])
        .unwrap()
        .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
        .unwrap();
    buffer
}

pub fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let pad = 16 - data.len() % 16;
    let mut out = data.to_vec();
    out.extend(std::iter::repeat(pad as u8).take(pad));
    out
}

fn write_plists(root: &Path, version: &str, encrypted: bool, modern: bool) {
    let mut lockdown = Dictionary::new();
    lockdown.insert("ProductVersion".to_string(), Value::String(version.to_string()));

    let mut manifest = Dictionary::new();
    manifest.insert("IsEncrypted".to_string(), Value::Boolean(encrypted));
    manifest.insert("Lockdown".to_string(), Value::Dictionary(lockdown));
    if encrypted {
        manifest.insert(
            "BackupKeyBag".to_string(),
            Value::Data(keybag(PASSWORD, modern)),
        );
        if modern {
            manifest.insert(
                "ManifestKey".to_string(),
                Value::Data(wrapped_file_key(MANIFEST_KEY_CLASS)),
            );
        }
    }
    Value::Dictionary(manifest)
        .to_file_binary(root.join("Manifest.plist"))
        .unwrap();

    let mut info = Dictionary::new();
    info.insert(
        "Target Identifier".to_string(),
        Value::String("00008030-001A2B3C4D5E6F70".to_string()),
    );
    info.insert("IMEI".to_string(), Value::String("356789012345678".to_string()));
    info.insert("iTunes Version".to_string(), Value::String("12.12.4".to_string()));
    info.insert(
        "Installed Applications".to_string(),
        Value::Array(vec![Value::String("com.example.notes".to_string())]),
    );
    Value::Dictionary(info)
        .to_file_xml(root.join("Info.plist"))
        .unwrap();

    let mut status = Dictionary::new();
    let date = SystemTime::UNIX_EPOCH + Duration::from_secs(MTIME);
    status.insert("Date".to_string(), Value::Date(date.into()));
    status.insert("Version".to_string(), Value::String("3.3".to_string()));
    Value::Dictionary(status)
        .to_file_xml(root.join("Status.plist"))
        .unwrap();
}

fn write_content(root: &Path, spec: &FileSpec, encrypted: bool, modern: bool) {
    let content = match (&spec.content, spec.kind) {
        (Some(content), Kind::File) => content,
        _ => return,
    };
    let data = if encrypted {
        encrypt(&pkcs7_pad(content))
    } else {
        content.clone()
    };
    let id = spec.file_id();
    let path = if modern {
        root.join(&id[..2]).join(&id)
    } else {
        root.join(&id)
    };
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, data).unwrap();
}

/// `MBFile` keyed archive as stored in the `file` column.
pub fn mbfile_archive(spec: &FileSpec, encrypted: bool) -> Vec<u8> {
    let mut class = Dictionary::new();
    class.insert("$classname".to_string(), Value::String("MBFile".to_string()));
    class.insert(
        "$classes".to_string(),
        Value::Array(vec![
            Value::String("MBFile".to_string()),
            Value::String("NSObject".to_string()),
        ]),
    );

    let size = spec.size();
    let mut root = Dictionary::new();
    root.insert("$class".to_string(), Value::Uid(Uid::new(3)));
    root.insert("RelativePath".to_string(), Value::Uid(Uid::new(2)));
    root.insert("LastModified".to_string(), Value::Integer(MTIME.into()));
    root.insert("Birth".to_string(), Value::Integer(0x6108ed24u64.into()));
    root.insert("LastStatusChange".to_string(), Value::Integer(0x610a914du64.into()));
    root.insert("Size".to_string(), Value::Integer(size.into()));
    root.insert("Mode".to_string(), Value::Integer(u64::from(spec.mode()).into()));
    root.insert("GroupID".to_string(), Value::Integer(501u64.into()));
    root.insert("UserID".to_string(), Value::Integer(501u64.into()));
    root.insert("ProtectionClass".to_string(), Value::Integer(u64::from(FILE_KEY_CLASS).into()));

    let mut objects = vec![
        Value::String("$null".to_string()),
        Value::Dictionary(root),
        Value::String(spec.path.to_string()),
        Value::Dictionary(class),
    ];
    if encrypted && spec.kind == Kind::File {
        let mut key = Dictionary::new();
        key.insert("NS.data".to_string(), Value::Data(wrapped_file_key(FILE_KEY_CLASS)));
        objects.push(Value::Dictionary(key));
        if let Some(Value::Dictionary(root)) = objects.get_mut(1) {
            root.insert("EncryptionKey".to_string(), Value::Uid(Uid::new(4)));
        }
    }

    let mut top = Dictionary::new();
    top.insert("root".to_string(), Value::Uid(Uid::new(1)));
    let mut archive = Dictionary::new();
    archive.insert("$version".to_string(), Value::Integer(100000u64.into()));
    archive.insert("$archiver".to_string(), Value::String("NSKeyedArchiver".to_string()));
    archive.insert("$top".to_string(), Value::Dictionary(top));
    archive.insert("$objects".to_string(), Value::Array(objects));

    let mut out = Vec::new();
    Value::Dictionary(archive).to_writer_binary(&mut out).unwrap();
    out
}

fn write_manifest_db(root: &Path, files: &[FileSpec], encrypted: bool) {
    let scratch = tempfile::tempdir().unwrap();
    let db_path = scratch.path().join("Manifest.db");
    {
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE Files (fileID TEXT PRIMARY KEY, domain TEXT, relativePath TEXT, flags INTEGER, file BLOB);
             CREATE INDEX FilesDomainIdx ON Files(domain);
             CREATE INDEX FilesRelativePathIdx ON Files(relativePath);
             CREATE TABLE Properties (key TEXT PRIMARY KEY, value BLOB);",
        )
        .unwrap();
        for spec in files {
            let flags = match spec.kind {
                Kind::File => 1,
                Kind::Directory => 2,
            };
            conn.execute(
                "INSERT INTO Files (fileID, domain, relativePath, flags, file) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    spec.file_id(),
                    spec.domain,
                    spec.path,
                    flags,
                    mbfile_archive(spec, encrypted)
                ],
            )
            .unwrap();
        }
    }

    let data = std::fs::read(&db_path).unwrap();
    let data = if encrypted { encrypt(&data) } else { data };
    std::fs::write(root.join("Manifest.db"), data).unwrap();
}

/// Point the `relativePath` column of a row at `relative_path`, leaving the
/// archived `MBFile` as it was. Only valid on unencrypted backups.
pub fn rewrite_row_path(root: &Path, file_id: &str, relative_path: &str) {
    let conn = Connection::open(root.join("Manifest.db")).unwrap();
    let changed = conn
        .execute(
            "UPDATE Files SET relativePath = ?1 WHERE fileID = ?2",
            params![relative_path, file_id],
        )
        .unwrap();
    assert_eq!(changed, 1);
}

fn mbdb_string(out: &mut Vec<u8>, value: Option<&[u8]>) {
    match value {
        Some(v) => {
            out.write_u16::<BigEndian>(v.len() as u16).unwrap();
            out.extend_from_slice(v);
        }
        None => out.write_u16::<BigEndian>(0xFFFF).unwrap(),
    }
}

pub fn mbdb_record(spec: &FileSpec, encrypted: bool) -> Vec<u8> {
    let key = if encrypted && spec.kind == Kind::File {
        Some(wrapped_file_key(FILE_KEY_CLASS))
    } else {
        None
    };
    let size = spec.size();

    let mut out = Vec::new();
    mbdb_string(&mut out, Some(spec.domain.as_bytes()));
    mbdb_string(&mut out, Some(spec.path.as_bytes()));
    mbdb_string(&mut out, None);
    mbdb_string(&mut out, None);
    mbdb_string(&mut out, key.as_deref());
    out.write_u16::<BigEndian>(spec.mode()).unwrap();
    out.write_u32::<BigEndian>(0x12D8).unwrap();
    out.write_u32::<BigEndian>(0).unwrap();
    out.write_u32::<BigEndian>(501).unwrap();
    out.write_u32::<BigEndian>(501).unwrap();
    out.write_u32::<BigEndian>(MTIME as u32).unwrap();
    out.write_u32::<BigEndian>(0x610a914d).unwrap();
    out.write_u32::<BigEndian>(0x6108ed24).unwrap();
    out.write_u64::<BigEndian>(size).unwrap();
    out.write_u8(match spec.kind {
        Kind::File => 1,
        Kind::Directory => 2,
    })
    .unwrap();
    out.write_u8(0).unwrap();
    out
}

fn write_mbdb(root: &Path, files: &[FileSpec], encrypted: bool) {
    let mut data = b"mbdb\x05\x00".to_vec();
    for spec in files {
        data.extend(mbdb_record(spec, encrypted));
    }
    std::fs::write(root.join("Manifest.mbdb"), data).unwrap();
}

/// Write an iOS 10.3 backup into `root`.
pub fn modern_backup(root: &Path, files: &[FileSpec], encrypted: bool) {
    write_plists(root, MODERN_VERSION, encrypted, true);
    write_manifest_db(root, files, encrypted);
    for spec in files {
        write_content(root, spec, encrypted, true);
    }
}

/// Write an iOS 9 backup into `root`.
pub fn legacy_backup(root: &Path, files: &[FileSpec], encrypted: bool) {
    write_plists(root, LEGACY_VERSION, encrypted, false);
    write_mbdb(root, files, encrypted);
    for spec in files {
        write_content(root, spec, encrypted, false);
    }
}
