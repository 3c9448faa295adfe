//! 9P2000 message decoding, rendering and encoding.
//!
//! Every 9P2000 message has the layout:
//! ```text
//! ┌──────────┬────────┬─────────┬──────────────────┐
//! │ size     │ type   │ tag     │ type-specific    │
//! │ 4 bytes  │ 1 byte │ 2 bytes │ fields           │
//! │ u32 LE   │        │ u16 LE  │                  │
//! └──────────┴────────┴─────────┴──────────────────┘
//! ```
//!
//! `size` counts the whole message, itself included. Strings are a u16 LE
//! length followed by UTF-8 bytes. All integers are little-endian.
//!
//! [`NinePRenderer`] plugs the decoder into the frame observer. The encoder
//! ([`Fcall::encode`]) exists to build traffic for tests and demos.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::render::{FrameRenderer, RenderError};

/// Fixed header: size[4] type[1] tag[2].
pub const HEADER_SIZE: usize = 7;

/// Tag used by Tversion/Rversion.
pub const NOTAG: u16 = 0xFFFF;

/// "No fid", used for afid when no authentication is performed.
pub const NOFID: u32 = 0xFFFF_FFFF;

/// Size of an encoded qid: type[1] version[4] path[8].
pub const QID_SIZE: usize = 13;

/// Message type bytes.
pub mod msg {
    pub const TVERSION: u8 = 100;
    pub const RVERSION: u8 = 101;
    pub const TAUTH: u8 = 102;
    pub const RAUTH: u8 = 103;
    pub const TATTACH: u8 = 104;
    pub const RATTACH: u8 = 105;
    /// Never valid on the wire.
    pub const TERROR: u8 = 106;
    pub const RERROR: u8 = 107;
    pub const TFLUSH: u8 = 108;
    pub const RFLUSH: u8 = 109;
    pub const TWALK: u8 = 110;
    pub const RWALK: u8 = 111;
    pub const TOPEN: u8 = 112;
    pub const ROPEN: u8 = 113;
    pub const TCREATE: u8 = 114;
    pub const RCREATE: u8 = 115;
    pub const TREAD: u8 = 116;
    pub const RREAD: u8 = 117;
    pub const TWRITE: u8 = 118;
    pub const RWRITE: u8 = 119;
    pub const TCLUNK: u8 = 120;
    pub const RCLUNK: u8 = 121;
    pub const TREMOVE: u8 = 122;
    pub const RREMOVE: u8 = 123;
    pub const TSTAT: u8 = 124;
    pub const RSTAT: u8 = 125;
    pub const TWSTAT: u8 = 126;
    pub const RWSTAT: u8 = 127;
}

/// Server-side file identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Qid {
    pub kind: u8,
    pub version: u32,
    pub path: u64,
}

impl Qid {
    pub const DIR: u8 = 0x80;
    pub const APPEND: u8 = 0x40;
    pub const EXCL: u8 = 0x20;
    pub const AUTH: u8 = 0x08;
    pub const TMP: u8 = 0x04;
}

impl fmt::Display for Qid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:016x} {} '", self.path, self.version)?;
        for (bit, c) in [
            (Self::DIR, 'd'),
            (Self::APPEND, 'a'),
            (Self::EXCL, 'l'),
            (Self::AUTH, 'A'),
            (Self::TMP, 't'),
        ] {
            if self.kind & bit != 0 {
                write!(f, "{c}")?;
            }
        }
        write!(f, "')")
    }
}

/// Directory entry as carried by Rstat and Twstat.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Stat {
    pub kind: u16,
    pub dev: u32,
    pub qid: Qid,
    pub mode: u32,
    pub atime: u32,
    pub mtime: u32,
    pub length: u64,
    pub name: String,
    pub uid: String,
    pub gid: String,
    pub muid: String,
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' '{}' '{}' '{}' q {} m {:#o} at {} mt {} l {} t {} d {}",
            self.name,
            self.uid,
            self.gid,
            self.muid,
            self.qid,
            self.mode,
            self.atime,
            self.mtime,
            self.length,
            self.kind,
            self.dev
        )
    }
}

/// Type-specific part of a 9P2000 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Tversion { msize: u32, version: String },
    Rversion { msize: u32, version: String },
    Tauth { afid: u32, uname: String, aname: String },
    Rauth { aqid: Qid },
    Tattach { fid: u32, afid: u32, uname: String, aname: String },
    Rattach { qid: Qid },
    Rerror { ename: String },
    Tflush { oldtag: u16 },
    Rflush,
    Twalk { fid: u32, newfid: u32, wnames: Vec<String> },
    Rwalk { qids: Vec<Qid> },
    Topen { fid: u32, mode: u8 },
    Ropen { qid: Qid, iounit: u32 },
    Tcreate { fid: u32, name: String, perm: u32, mode: u8 },
    Rcreate { qid: Qid, iounit: u32 },
    Tread { fid: u32, offset: u64, count: u32 },
    Rread { data: Bytes },
    Twrite { fid: u32, offset: u64, data: Bytes },
    Rwrite { count: u32 },
    Tclunk { fid: u32 },
    Rclunk,
    Tremove { fid: u32 },
    Rremove,
    Tstat { fid: u32 },
    Rstat { stat: Stat },
    Twstat { fid: u32, stat: Stat },
    Rwstat,
}

impl Body {
    /// The wire type byte for this body.
    pub fn message_type(&self) -> u8 {
        match self {
            Body::Tversion { .. } => msg::TVERSION,
            Body::Rversion { .. } => msg::RVERSION,
            Body::Tauth { .. } => msg::TAUTH,
            Body::Rauth { .. } => msg::RAUTH,
            Body::Tattach { .. } => msg::TATTACH,
            Body::Rattach { .. } => msg::RATTACH,
            Body::Rerror { .. } => msg::RERROR,
            Body::Tflush { .. } => msg::TFLUSH,
            Body::Rflush => msg::RFLUSH,
            Body::Twalk { .. } => msg::TWALK,
            Body::Rwalk { .. } => msg::RWALK,
            Body::Topen { .. } => msg::TOPEN,
            Body::Ropen { .. } => msg::ROPEN,
            Body::Tcreate { .. } => msg::TCREATE,
            Body::Rcreate { .. } => msg::RCREATE,
            Body::Tread { .. } => msg::TREAD,
            Body::Rread { .. } => msg::RREAD,
            Body::Twrite { .. } => msg::TWRITE,
            Body::Rwrite { .. } => msg::RWRITE,
            Body::Tclunk { .. } => msg::TCLUNK,
            Body::Rclunk => msg::RCLUNK,
            Body::Tremove { .. } => msg::TREMOVE,
            Body::Rremove => msg::RREMOVE,
            Body::Tstat { .. } => msg::TSTAT,
            Body::Rstat { .. } => msg::RSTAT,
            Body::Twstat { .. } => msg::TWSTAT,
            Body::Rwstat => msg::RWSTAT,
        }
    }
}

/// A complete 9P2000 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fcall {
    pub tag: u16,
    pub body: Body,
}

impl Fcall {
    pub fn new(tag: u16, body: Body) -> Self {
        Self { tag, body }
    }

    /// Tversion with [`NOTAG`], as a client opens a session.
    pub fn version(msize: u32, version: &str) -> Self {
        Self::new(
            NOTAG,
            Body::Tversion {
                msize,
                version: version.to_string(),
            },
        )
    }

    /// Decode a whole message, size prefix included.
    ///
    /// The size field must equal `frame.len()` and every byte must be
    /// consumed by the message's fields.
    pub fn decode(frame: &[u8]) -> Result<Self, RenderError> {
        if frame.len() < HEADER_SIZE {
            return Err(RenderError::TooShort {
                len: frame.len(),
                min: HEADER_SIZE,
            });
        }
        let mut fields = Fields { buf: frame };
        let declared = fields.u32("size")? as usize;
        if declared != frame.len() {
            return Err(RenderError::SizeMismatch {
                declared,
                actual: frame.len(),
            });
        }
        let kind = fields.u8("type")?;
        let tag = fields.u16("tag")?;

        let body = match kind {
            msg::TVERSION => Body::Tversion {
                msize: fields.u32("msize")?,
                version: fields.string("version")?,
            },
            msg::RVERSION => Body::Rversion {
                msize: fields.u32("msize")?,
                version: fields.string("version")?,
            },
            msg::TAUTH => Body::Tauth {
                afid: fields.u32("afid")?,
                uname: fields.string("uname")?,
                aname: fields.string("aname")?,
            },
            msg::RAUTH => Body::Rauth {
                aqid: fields.qid("aqid")?,
            },
            msg::TATTACH => Body::Tattach {
                fid: fields.u32("fid")?,
                afid: fields.u32("afid")?,
                uname: fields.string("uname")?,
                aname: fields.string("aname")?,
            },
            msg::RATTACH => Body::Rattach {
                qid: fields.qid("qid")?,
            },
            msg::RERROR => Body::Rerror {
                ename: fields.string("ename")?,
            },
            msg::TFLUSH => Body::Tflush {
                oldtag: fields.u16("oldtag")?,
            },
            msg::RFLUSH => Body::Rflush,
            msg::TWALK => {
                let fid = fields.u32("fid")?;
                let newfid = fields.u32("newfid")?;
                let count = fields.u16("nwname")?;
                let wnames = (0..count)
                    .map(|_| fields.string("wname"))
                    .collect::<Result<Vec<_>, _>>()?;
                Body::Twalk {
                    fid,
                    newfid,
                    wnames,
                }
            }
            msg::RWALK => {
                let count = fields.u16("nwqid")?;
                let qids = (0..count)
                    .map(|_| fields.qid("wqid"))
                    .collect::<Result<Vec<_>, _>>()?;
                Body::Rwalk { qids }
            }
            msg::TOPEN => Body::Topen {
                fid: fields.u32("fid")?,
                mode: fields.u8("mode")?,
            },
            msg::ROPEN => Body::Ropen {
                qid: fields.qid("qid")?,
                iounit: fields.u32("iounit")?,
            },
            msg::TCREATE => Body::Tcreate {
                fid: fields.u32("fid")?,
                name: fields.string("name")?,
                perm: fields.u32("perm")?,
                mode: fields.u8("mode")?,
            },
            msg::RCREATE => Body::Rcreate {
                qid: fields.qid("qid")?,
                iounit: fields.u32("iounit")?,
            },
            msg::TREAD => Body::Tread {
                fid: fields.u32("fid")?,
                offset: fields.u64("offset")?,
                count: fields.u32("count")?,
            },
            msg::RREAD => {
                let count = fields.u32("count")? as usize;
                Body::Rread {
                    data: fields.bytes(count, "data")?,
                }
            }
            msg::TWRITE => {
                let fid = fields.u32("fid")?;
                let offset = fields.u64("offset")?;
                let count = fields.u32("count")? as usize;
                Body::Twrite {
                    fid,
                    offset,
                    data: fields.bytes(count, "data")?,
                }
            }
            msg::RWRITE => Body::Rwrite {
                count: fields.u32("count")?,
            },
            msg::TCLUNK => Body::Tclunk {
                fid: fields.u32("fid")?,
            },
            msg::RCLUNK => Body::Rclunk,
            msg::TREMOVE => Body::Tremove {
                fid: fields.u32("fid")?,
            },
            msg::RREMOVE => Body::Rremove,
            msg::TSTAT => Body::Tstat {
                fid: fields.u32("fid")?,
            },
            msg::RSTAT => Body::Rstat {
                stat: fields.counted_stat()?,
            },
            msg::TWSTAT => Body::Twstat {
                fid: fields.u32("fid")?,
                stat: fields.counted_stat()?,
            },
            msg::RWSTAT => Body::Rwstat,
            other => return Err(RenderError::UnknownType(other)),
        };
        fields.finish()?;

        Ok(Self { tag, body })
    }

    /// Encode to wire bytes, size prefix included.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u32_le(0);
        buf.put_u8(self.body.message_type());
        buf.put_u16_le(self.tag);

        match &self.body {
            Body::Tversion { msize, version } | Body::Rversion { msize, version } => {
                buf.put_u32_le(*msize);
                put_string(&mut buf, version);
            }
            Body::Tauth { afid, uname, aname } => {
                buf.put_u32_le(*afid);
                put_string(&mut buf, uname);
                put_string(&mut buf, aname);
            }
            Body::Rauth { aqid: qid } | Body::Rattach { qid } => put_qid(&mut buf, qid),
            Body::Tattach {
                fid,
                afid,
                uname,
                aname,
            } => {
                buf.put_u32_le(*fid);
                buf.put_u32_le(*afid);
                put_string(&mut buf, uname);
                put_string(&mut buf, aname);
            }
            Body::Rerror { ename } => put_string(&mut buf, ename),
            Body::Tflush { oldtag } => buf.put_u16_le(*oldtag),
            Body::Twalk {
                fid,
                newfid,
                wnames,
            } => {
                buf.put_u32_le(*fid);
                buf.put_u32_le(*newfid);
                buf.put_u16_le(wnames.len() as u16);
                for name in wnames {
                    put_string(&mut buf, name);
                }
            }
            Body::Rwalk { qids } => {
                buf.put_u16_le(qids.len() as u16);
                for qid in qids {
                    put_qid(&mut buf, qid);
                }
            }
            Body::Topen { fid, mode } => {
                buf.put_u32_le(*fid);
                buf.put_u8(*mode);
            }
            Body::Ropen { qid, iounit } | Body::Rcreate { qid, iounit } => {
                put_qid(&mut buf, qid);
                buf.put_u32_le(*iounit);
            }
            Body::Tcreate {
                fid,
                name,
                perm,
                mode,
            } => {
                buf.put_u32_le(*fid);
                put_string(&mut buf, name);
                buf.put_u32_le(*perm);
                buf.put_u8(*mode);
            }
            Body::Tread { fid, offset, count } => {
                buf.put_u32_le(*fid);
                buf.put_u64_le(*offset);
                buf.put_u32_le(*count);
            }
            Body::Rread { data } => {
                buf.put_u32_le(data.len() as u32);
                buf.put_slice(data);
            }
            Body::Twrite { fid, offset, data } => {
                buf.put_u32_le(*fid);
                buf.put_u64_le(*offset);
                buf.put_u32_le(data.len() as u32);
                buf.put_slice(data);
            }
            Body::Rwrite { count } => buf.put_u32_le(*count),
            Body::Tclunk { fid } | Body::Tremove { fid } | Body::Tstat { fid } => {
                buf.put_u32_le(*fid)
            }
            Body::Rstat { stat } => put_counted_stat(&mut buf, stat),
            Body::Twstat { fid, stat } => {
                buf.put_u32_le(*fid);
                put_counted_stat(&mut buf, stat);
            }
            Body::Rflush | Body::Rclunk | Body::Rremove | Body::Rwstat => {}
        }

        let size = buf.len() as u32;
        buf[..4].copy_from_slice(&size.to_le_bytes());
        buf.freeze()
    }
}

impl fmt::Display for Fcall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag;
        match &self.body {
            Body::Tversion { msize, version } => {
                write!(f, "Tversion tag {tag} msize {msize} version '{version}'")
            }
            Body::Rversion { msize, version } => {
                write!(f, "Rversion tag {tag} msize {msize} version '{version}'")
            }
            Body::Tauth { afid, uname, aname } => write!(
                f,
                "Tauth tag {tag} afid {afid} uname '{uname}' aname '{aname}'"
            ),
            Body::Rauth { aqid } => write!(f, "Rauth tag {tag} aqid {aqid}"),
            Body::Tattach {
                fid,
                afid,
                uname,
                aname,
            } => write!(
                f,
                "Tattach tag {tag} fid {fid} afid {afid} uname '{uname}' aname '{aname}'"
            ),
            Body::Rattach { qid } => write!(f, "Rattach tag {tag} qid {qid}"),
            Body::Rerror { ename } => write!(f, "Rerror tag {tag} ename '{ename}'"),
            Body::Tflush { oldtag } => write!(f, "Tflush tag {tag} oldtag {oldtag}"),
            Body::Rflush => write!(f, "Rflush tag {tag}"),
            Body::Twalk {
                fid,
                newfid,
                wnames,
            } => {
                write!(
                    f,
                    "Twalk tag {tag} fid {fid} newfid {newfid} nwname {}",
                    wnames.len()
                )?;
                for name in wnames {
                    write!(f, " '{name}'")?;
                }
                Ok(())
            }
            Body::Rwalk { qids } => {
                write!(f, "Rwalk tag {tag} nwqid {}", qids.len())?;
                for qid in qids {
                    write!(f, " {qid}")?;
                }
                Ok(())
            }
            Body::Topen { fid, mode } => write!(f, "Topen tag {tag} fid {fid} mode {mode:#x}"),
            Body::Ropen { qid, iounit } => {
                write!(f, "Ropen tag {tag} qid {qid} iounit {iounit}")
            }
            Body::Tcreate {
                fid,
                name,
                perm,
                mode,
            } => write!(
                f,
                "Tcreate tag {tag} fid {fid} name '{name}' perm {perm:#o} mode {mode:#x}"
            ),
            Body::Rcreate { qid, iounit } => {
                write!(f, "Rcreate tag {tag} qid {qid} iounit {iounit}")
            }
            Body::Tread { fid, offset, count } => write!(
                f,
                "Tread tag {tag} fid {fid} offset {offset} count {count}"
            ),
            Body::Rread { data } => write!(f, "Rread tag {tag} count {}", data.len()),
            Body::Twrite { fid, offset, data } => write!(
                f,
                "Twrite tag {tag} fid {fid} offset {offset} count {}",
                data.len()
            ),
            Body::Rwrite { count } => write!(f, "Rwrite tag {tag} count {count}"),
            Body::Tclunk { fid } => write!(f, "Tclunk tag {tag} fid {fid}"),
            Body::Rclunk => write!(f, "Rclunk tag {tag}"),
            Body::Tremove { fid } => write!(f, "Tremove tag {tag} fid {fid}"),
            Body::Rremove => write!(f, "Rremove tag {tag}"),
            Body::Tstat { fid } => write!(f, "Tstat tag {tag} fid {fid}"),
            Body::Rstat { stat } => write!(f, "Rstat tag {tag} st ({stat})"),
            Body::Twstat { fid, stat } => write!(f, "Twstat tag {tag} fid {fid} st ({stat})"),
            Body::Rwstat => write!(f, "Rwstat tag {tag}"),
        }
    }
}

/// Renders 9P2000 frames with [`Fcall`]'s `Display` form.
#[derive(Debug, Clone, Copy, Default)]
pub struct NinePRenderer;

impl FrameRenderer for NinePRenderer {
    fn render(&self, frame: &[u8]) -> Result<String, RenderError> {
        Fcall::decode(frame).map(|fcall| fcall.to_string())
    }
}

/// Bounds-checked little-endian field reader over a frame.
struct Fields<'a> {
    buf: &'a [u8],
}

impl<'a> Fields<'a> {
    fn need(&self, n: usize, field: &'static str) -> Result<(), RenderError> {
        if self.buf.remaining() < n {
            return Err(RenderError::Truncated { field });
        }
        Ok(())
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, RenderError> {
        self.need(1, field)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, RenderError> {
        self.need(2, field)?;
        Ok(self.buf.get_u16_le())
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, RenderError> {
        self.need(4, field)?;
        Ok(self.buf.get_u32_le())
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, RenderError> {
        self.need(8, field)?;
        Ok(self.buf.get_u64_le())
    }

    fn slice(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], RenderError> {
        self.need(len, field)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn bytes(&mut self, len: usize, field: &'static str) -> Result<Bytes, RenderError> {
        self.slice(len, field).map(Bytes::copy_from_slice)
    }

    fn string(&mut self, field: &'static str) -> Result<String, RenderError> {
        let len = self.u16(field)? as usize;
        let raw = self.slice(len, field)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| RenderError::InvalidUtf8 { field })
    }

    fn qid(&mut self, field: &'static str) -> Result<Qid, RenderError> {
        self.need(QID_SIZE, field)?;
        Ok(Qid {
            kind: self.buf.get_u8(),
            version: self.buf.get_u32_le(),
            path: self.buf.get_u64_le(),
        })
    }

    /// nstat[2] followed by a stat entry of exactly that many bytes.
    fn counted_stat(&mut self) -> Result<Stat, RenderError> {
        let nstat = self.u16("nstat")? as usize;
        let mut inner = Fields {
            buf: self.slice(nstat, "stat")?,
        };
        let stat = inner.stat()?;
        inner.finish()?;
        Ok(stat)
    }

    fn stat(&mut self) -> Result<Stat, RenderError> {
        let size = self.u16("stat size")? as usize;
        let mut entry = Fields {
            buf: self.slice(size, "stat")?,
        };
        let stat = Stat {
            kind: entry.u16("stat type")?,
            dev: entry.u32("stat dev")?,
            qid: entry.qid("stat qid")?,
            mode: entry.u32("stat mode")?,
            atime: entry.u32("stat atime")?,
            mtime: entry.u32("stat mtime")?,
            length: entry.u64("stat length")?,
            name: entry.string("stat name")?,
            uid: entry.string("stat uid")?,
            gid: entry.string("stat gid")?,
            muid: entry.string("stat muid")?,
        };
        entry.finish()?;
        Ok(stat)
    }

    fn finish(self) -> Result<(), RenderError> {
        if !self.buf.is_empty() {
            return Err(RenderError::TrailingBytes(self.buf.len()));
        }
        Ok(())
    }
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u16_le(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn put_qid(buf: &mut BytesMut, qid: &Qid) {
    buf.put_u8(qid.kind);
    buf.put_u32_le(qid.version);
    buf.put_u64_le(qid.path);
}

fn put_counted_stat(buf: &mut BytesMut, stat: &Stat) {
    let mut entry = BytesMut::with_capacity(64);
    entry.put_u16_le(stat.kind);
    entry.put_u32_le(stat.dev);
    put_qid(&mut entry, &stat.qid);
    entry.put_u32_le(stat.mode);
    entry.put_u32_le(stat.atime);
    entry.put_u32_le(stat.mtime);
    entry.put_u64_le(stat.length);
    put_string(&mut entry, &stat.name);
    put_string(&mut entry, &stat.uid);
    put_string(&mut entry, &stat.gid);
    put_string(&mut entry, &stat.muid);

    buf.put_u16_le(entry.len() as u16 + 2);
    buf.put_u16_le(entry.len() as u16);
    buf.put_slice(&entry);
}
