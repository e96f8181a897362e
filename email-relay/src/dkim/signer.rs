use base64::{engine::general_purpose::STANDARD, Engine};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use super::canonicalize::{relaxed_body, relaxed_header};
use super::message::{self, HeaderField};
use super::DkimError;

const HEADER_NAME: &str = "DKIM-Signature";
const MAX_LINE: usize = 78;

/// Signs outbound messages for one `d=`/`s=` pair.
#[derive(Clone)]
pub struct DkimSigner {
    domain: String,
    selector: String,
    headers: Vec<String>,
    signing_key: SigningKey<Sha256>,
    public_key: RsaPublicKey,
}

impl std::fmt::Debug for DkimSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DkimSigner")
            .field("domain", &self.domain)
            .field("selector", &self.selector)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl DkimSigner {
    pub fn new(domain: &str, selector: &str, headers: Vec<String>, key: RsaPrivateKey) -> Self {
        let public_key = key.to_public_key();
        Self {
            domain: domain.to_string(),
            selector: selector.to_string(),
            headers,
            signing_key: SigningKey::<Sha256>::new(key),
            public_key,
        }
    }

    /// PKCS#8 or PKCS#1 PEM.
    pub fn from_pem(
        domain: &str,
        selector: &str,
        headers: Vec<String>,
        pem: &str,
    ) -> Result<Self, DkimError> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| DkimError::InvalidKey(e.to_string()))?;
        Ok(Self::new(domain, selector, headers, key))
    }

    pub fn from_pem_file(
        domain: &str,
        selector: &str,
        headers: Vec<String>,
        path: &str,
    ) -> Result<Self, DkimError> {
        let pem = std::fs::read_to_string(path)
            .map_err(|e| DkimError::InvalidKey(format!("{}: {}", path, e)))?;
        Self::from_pem(domain, selector, headers, &pem)
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Build the folded `DKIM-Signature: ...\r\n` header line for `message`.
    pub fn sign(&self, message: &[u8]) -> Result<String, DkimError> {
        let (fields, body) = message::split(message)?;
        let body_hash = STANDARD.encode(Sha256::digest(relaxed_body(body)));

        let mut folder = Folder::new(HEADER_NAME);
        folder.word("v=1;", true);
        folder.word("a=rsa-sha256;", true);
        folder.word("c=relaxed/relaxed;", true);
        folder.word(&format!("d={};", self.domain), true);
        folder.word(&format!("s={};", self.selector), true);
        for (i, name) in self.headers.iter().enumerate() {
            let last = i + 1 == self.headers.len();
            let token = match (i, last) {
                (0, true) => format!("h={};", name),
                (0, false) => format!("h={}:", name),
                (_, true) => format!("{};", name),
                (_, false) => format!("{}:", name),
            };
            folder.word(&token, i == 0);
        }
        folder.word(&format!("bh={};", body_hash), true);
        folder.word("b=", true);

        let data = signed_data(&fields, &self.headers, folder.value());
        let signature = self
            .signing_key
            .try_sign(&data)
            .map_err(|e| DkimError::Signing(e.to_string()))?;

        folder.split(&STANDARD.encode(signature.to_bytes()));
        Ok(folder.finish())
    }
}

/// Check the topmost `DKIM-Signature` of `message` against `public_key`.
pub fn verify(message: &[u8], public_key: &RsaPublicKey) -> Result<(), DkimError> {
    let (fields, body) = message::split(message)?;
    let header = fields
        .iter()
        .find(|f| f.name.trim().eq_ignore_ascii_case(HEADER_NAME))
        .ok_or(DkimError::MissingSignature)?;
    let tags = parse_tags(&header.value);

    for (name, expected) in [("a", "rsa-sha256"), ("c", "relaxed/relaxed")] {
        let value = find_tag(&tags, name)?;
        if value != expected {
            return Err(DkimError::UnsupportedAlgorithm(format!("{}={}", name, value)));
        }
    }

    let body_hash = STANDARD.encode(Sha256::digest(relaxed_body(body)));
    if body_hash != find_tag(&tags, "bh")? {
        return Err(DkimError::BodyHashMismatch);
    }

    let names: Vec<String> = find_tag(&tags, "h")?.split(':').map(str::to_string).collect();
    let signed: Vec<HeaderField> = fields
        .iter()
        .filter(|f| !std::ptr::eq(*f, header))
        .cloned()
        .collect();
    let data = signed_data(&signed, &names, &strip_b_value(&header.value));

    let raw = STANDARD
        .decode(find_tag(&tags, "b")?)
        .map_err(|_| DkimError::SignatureMismatch)?;
    let signature = Signature::try_from(raw.as_slice()).map_err(|_| DkimError::SignatureMismatch)?;
    VerifyingKey::<Sha256>::new(public_key.clone())
        .verify(&data, &signature)
        .map_err(|_| DkimError::SignatureMismatch)
}

/// Hash input: the selected headers in `h=` order, then the signature
/// header itself with an empty `b=` and no trailing CRLF.
fn signed_data(fields: &[HeaderField], names: &[String], signature_value: &str) -> Vec<u8> {
    let mut data = String::new();
    for field in message::select(fields, names) {
        data.push_str(&relaxed_header(&field.name, &field.value));
    }
    let own = relaxed_header(HEADER_NAME, signature_value);
    data.push_str(own.trim_end_matches("\r\n"));
    data.into_bytes()
}

fn find_tag<'a>(tags: &'a [(String, String)], name: &str) -> Result<&'a str, DkimError> {
    tags.iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
        .ok_or_else(|| DkimError::MalformedMessage(format!("missing {}= tag", name)))
}

/// `tag=value` pairs with all whitespace removed from the values.
fn parse_tags(value: &str) -> Vec<(String, String)> {
    value
        .split(';')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            let v: String = v.chars().filter(|c| !c.is_ascii_whitespace()).collect();
            Some((k.trim().to_string(), v))
        })
        .collect()
}

/// The header value with the `b=` tag emptied and everything else intact.
fn strip_b_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (i, segment) in value.split(';').enumerate() {
        if i > 0 {
            out.push(';');
        }
        let tag = segment.trim_start();
        if let Some(eq) = tag.find('=') {
            if tag[..eq].trim_end() == "b" {
                let lead = segment.len() - tag.len();
                out.push_str(&segment[..lead + eq + 1]);
                continue;
            }
        }
        out.push_str(segment);
    }
    out
}

/// Builds a header line folded at `MAX_LINE` columns.
struct Folder {
    out: String,
    name_len: usize,
    column: usize,
}

impl Folder {
    fn new(name: &str) -> Self {
        Self {
            out: format!("{}:", name),
            name_len: name.len() + 1,
            column: name.len() + 1,
        }
    }

    fn fold(&mut self) {
        self.out.push_str("\r\n ");
        self.column = 1;
    }

    /// Append `token`, after a space when `space` is set, folding first if
    /// it would overflow the line.
    fn word(&mut self, token: &str, space: bool) {
        let needed = token.len() + usize::from(space);
        if self.column + needed > MAX_LINE {
            self.fold();
        } else if space {
            self.out.push(' ');
            self.column += 1;
        }
        self.out.push_str(token);
        self.column += token.len();
    }

    /// Append `data`, breaking it wherever the line fills up.
    fn split(&mut self, data: &str) {
        let mut rest = data;
        while !rest.is_empty() {
            let room = MAX_LINE.saturating_sub(self.column);
            if room == 0 {
                self.fold();
                continue;
            }
            let (head, tail) = rest.split_at(room.min(rest.len()));
            self.out.push_str(head);
            self.column += head.len();
            rest = tail;
        }
    }

    /// Everything after the colon.
    fn value(&self) -> &str {
        &self.out[self.name_len..]
    }

    fn finish(mut self) -> String {
        self.out.push_str("\r\n");
        self.out
    }
}
