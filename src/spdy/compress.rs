//! SPDY header block compression
//!
//! Name/value header blocks are deflate-compressed with a version-specific
//! preset dictionary (SPDY/2 draft Section 2.6.9, SPDY/3 draft Section
//! 2.6.10.1). Each direction of a session keeps a single zlib context for
//! its whole lifetime; every block ends with a sync flush so it can be
//! decoded as soon as it arrives.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use super::error::{Error, Result};
use super::frames::SpdyVersion;

/// SPDY/2 compression dictionary, including the trailing NUL.
const HEADER_DICTIONARY_V2: &[u8] =
    b"optionsgetheadpostputdeletetraceacceptaccept-charsetaccept-encodingaccept-\
languageauthorizationexpectfromhostif-modified-sinceif-matchif-none-matchi\
f-rangeif-unmodifiedsincemax-forwardsproxy-authorizationrangerefererteuser\
-agent10010120020120220320420520630030130230330430530630740040140240340440\
5406407408409410411412413414415416417500501502503504505accept-rangesageeta\
glocationproxy-authenticatepublicretry-afterservervarywarningwww-authentic\
ateallowcontent-basecontent-encodingcache-controlconnectiondatetrailertran\
sfer-encodingupgradeviawarningcontent-languagecontent-lengthcontent-locati\
oncontent-md5content-rangecontent-typeetagexpireslast-modifiedset-cookieMo\
ndayTuesdayWednesdayThursdayFridaySaturdaySundayJanFebMarAprMayJunJulAugSe\
pOctNovDecchunkedtext/htmlimage/pngimage/jpgimage/gifapplication/xmlapplic\
ation/xhtmltext/plainpublicmax-agecharset=iso-8859-1utf-8gzipdeflateHTTP/1\
.1statusversionurl\0";

/// SPDY/3 compression dictionary: length-prefixed common tokens followed
/// by a run of common status and date text.
const HEADER_DICTIONARY_V3: &[u8] =
    b"\x00\x00\x00\x07options\x00\x00\x00\x04head\x00\x00\x00\x04post\
\x00\x00\x00\x03put\x00\x00\x00\x06delete\x00\x00\x00\x05trace\
\x00\x00\x00\x06accept\x00\x00\x00\x0eaccept-charset\
\x00\x00\x00\x0faccept-encoding\x00\x00\x00\x0faccept-language\
\x00\x00\x00\raccept-ranges\x00\x00\x00\x03age\x00\x00\x00\x05allow\
\x00\x00\x00\rauthorization\x00\x00\x00\rcache-control\
\x00\x00\x00\nconnection\x00\x00\x00\x0ccontent-base\
\x00\x00\x00\x10content-encoding\x00\x00\x00\x10content-language\
\x00\x00\x00\x0econtent-length\x00\x00\x00\x10content-location\
\x00\x00\x00\x0bcontent-md5\x00\x00\x00\rcontent-range\
\x00\x00\x00\x0ccontent-type\x00\x00\x00\x04date\x00\x00\x00\x04etag\
\x00\x00\x00\x06expect\x00\x00\x00\x07expires\x00\x00\x00\x04from\
\x00\x00\x00\x04host\x00\x00\x00\x08if-match\
\x00\x00\x00\x11if-modified-since\x00\x00\x00\rif-none-match\
\x00\x00\x00\x08if-range\x00\x00\x00\x13if-unmodified-since\
\x00\x00\x00\rlast-modified\x00\x00\x00\x08location\
\x00\x00\x00\x0cmax-forwards\x00\x00\x00\x06pragma\
\x00\x00\x00\x12proxy-authenticate\x00\x00\x00\x13proxy-authorization\
\x00\x00\x00\x05range\x00\x00\x00\x07referer\x00\x00\x00\x0bretry-after\
\x00\x00\x00\x06server\x00\x00\x00\x02te\x00\x00\x00\x07trailer\
\x00\x00\x00\x11transfer-encoding\x00\x00\x00\x07upgrade\
\x00\x00\x00\nuser-agent\x00\x00\x00\x04vary\x00\x00\x00\x03via\
\x00\x00\x00\x07warning\x00\x00\x00\x10www-authenticate\
\x00\x00\x00\x06method\x00\x00\x00\x03get\x00\x00\x00\x06status\
\x00\x00\x00\x06200 OK\x00\x00\x00\x07version\x00\x00\x00\x08HTTP/1.1\
\x00\x00\x00\x03url\x00\x00\x00\x06public\x00\x00\x00\nset-cookie\
\x00\x00\x00\nkeep-alive\x00\x00\x00\x06origin\
100101201202205206300302303304305306307402405406407408409410411412413414415416417502504505\
203 Non-Authoritative Information204 No Content301 Moved Permanently\
400 Bad Request401 Unauthorized403 Forbidden404 Not Found\
500 Internal Server Error501 Not Implemented503 Service Unavailable\
Jan Feb Mar Apr May Jun Jul Aug Sept Oct Nov Dec \
00:00:00 Mon, Tue, Wed, Thu, Fri, Sat, Sun, GMT\
chunked,text/html,image/png,image/jpg,image/gif,\
application/xml,application/xhtml+xml,text/plain,text/javascript,\
publicprivatemax-age=gzip,deflate,sdchcharset=utf-8charset=iso-8859-1,utf-,*,enq=0.";

/// The preset dictionary for a version
fn dictionary(version: SpdyVersion) -> &'static [u8] {
    match version {
        SpdyVersion::V2 => HEADER_DICTIONARY_V2,
        SpdyVersion::V3 => HEADER_DICTIONARY_V3,
    }
}

/// Stateful header block compressor
///
/// One per session; the deflate stream spans every header block the
/// session emits, in emit order.
pub struct HeaderCompressor {
    version: SpdyVersion,
    ctx: Compress,
    primed: bool,
}

impl HeaderCompressor {
    /// Create a compressor for the given version
    pub fn new(version: SpdyVersion) -> Self {
        HeaderCompressor {
            version,
            ctx: Compress::new(Compression::default(), true),
            primed: false,
        }
    }

    /// Compress one header block, ending with a sync flush
    pub fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        if !self.primed {
            self.ctx
                .set_dictionary(dictionary(self.version))
                .map_err(|e| Error::Compression(e.to_string()))?;
            self.primed = true;
        }

        let mut out = Vec::with_capacity(input.len() + 64);
        let mut consumed = 0usize;
        loop {
            if out.len() == out.capacity() {
                out.reserve(std::cmp::max(out.capacity(), 256));
            }

            let before_in = self.ctx.total_in();
            self.ctx
                .compress_vec(&input[consumed..], &mut out, FlushCompress::Sync)
                .map_err(|e| Error::Compression(e.to_string()))?;
            consumed += (self.ctx.total_in() - before_in) as usize;

            // The sync flush is complete once deflate stops filling the
            // output buffer with all input consumed.
            if consumed >= input.len() && out.len() < out.capacity() {
                break;
            }
        }

        Ok(out)
    }
}

/// Stateful header block decompressor
///
/// One per session; feeds every received header block through a single
/// inflate stream in arrival order. Any inflate failure poisons the
/// session (the compression state can no longer be trusted).
pub struct HeaderDecompressor {
    version: SpdyVersion,
    ctx: Decompress,
}

impl HeaderDecompressor {
    /// Create a decompressor for the given version
    pub fn new(version: SpdyVersion) -> Self {
        HeaderDecompressor {
            version,
            ctx: Decompress::new(true),
        }
    }

    /// Decompress one header block
    pub fn decompress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len() * 4 + 64);
        let mut consumed = 0usize;
        loop {
            if out.len() == out.capacity() {
                out.reserve(std::cmp::max(out.capacity(), 512));
            }

            let before_in = self.ctx.total_in();
            let before_out = self.ctx.total_out();
            match self
                .ctx
                .decompress_vec(&input[consumed..], &mut out, FlushDecompress::Sync)
            {
                Ok(Status::StreamEnd) => break,
                Ok(_) => {
                    let in_now = (self.ctx.total_in() - before_in) as usize;
                    let out_now = (self.ctx.total_out() - before_out) as usize;
                    consumed += in_now;

                    if consumed >= input.len() && out.len() < out.capacity() {
                        break;
                    }
                    if in_now == 0 && out_now == 0 && out.len() < out.capacity() {
                        return Err(Error::Compression(
                            "truncated or corrupt header block".to_string(),
                        ));
                    }
                }
                Err(e) => {
                    if e.needs_dictionary().is_some() {
                        self.ctx
                            .set_dictionary(dictionary(self.version))
                            .map_err(|e| Error::Compression(e.to_string()))?;
                        continue;
                    }
                    return Err(Error::Compression(e.to_string()));
                }
            }
        }

        Ok(out)
    }
}
