use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use memmap2::Mmap;
use ndarray::Array2;

use crate::error::{GsnapError, Result};

/// FITS logical record size in bytes.
pub const FITS_BLOCK: usize = 2880;
/// Header card size in bytes.
pub const CARD_LEN: usize = 80;

/// Parsed value of a single header card.
#[derive(Clone, Debug, PartialEq)]
pub enum CardValue {
    Logical(bool),
    Int(i64),
    Real(f64),
    Text(String),
    /// Card with no value indicator (COMMENT, HISTORY, blank).
    None,
}

/// One header-plus-data unit of a FITS file.
#[derive(Clone, Debug)]
pub struct HduInfo {
    pub bitpix: i32,
    /// NAXISn values, NAXIS1 (fastest axis) first.
    pub naxes: Vec<usize>,
    pub bscale: f64,
    pub bzero: f64,
    keywords: Vec<(String, CardValue)>,
    data_start: usize,
    data_len: usize,
}

impl HduInfo {
    /// Raw (unscaled) bytes per data element.
    fn bytes_per_element(&self) -> usize {
        (self.bitpix.unsigned_abs() as usize) / 8
    }

    /// True when the HDU holds a 2D image.
    pub fn is_image_2d(&self) -> bool {
        self.naxes.len() == 2 && self.data_len > 0
    }

    /// Image shape as (rows, cols) for a 2D HDU.
    pub fn dims(&self) -> Option<(usize, usize)> {
        if self.naxes.len() == 2 {
            Some((self.naxes[1], self.naxes[0]))
        } else {
            None
        }
    }

    /// Look up a keyword value in this HDU's header.
    pub fn keyword(&self, name: &str) -> Option<&CardValue> {
        self.keywords
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Numeric keyword lookup, accepting both integer and real cards.
    pub fn keyword_f64(&self, name: &str) -> Option<f64> {
        match self.keyword(name)? {
            CardValue::Int(v) => Some(*v as f64),
            CardValue::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn keyword_i64(&self, name: &str) -> Option<i64> {
        match self.keyword(name)? {
            CardValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

/// Memory-mapped FITS file reader.
pub struct FitsReader {
    mmap: Mmap,
    hdus: Vec<HduInfo>,
}

impl FitsReader {
    /// Open a FITS file and index its HDUs.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < FITS_BLOCK {
            return Err(GsnapError::InvalidFits(
                "file too small for a FITS header".into(),
            ));
        }
        if &mmap[0..6] != b"SIMPLE" {
            return Err(GsnapError::InvalidFits("missing SIMPLE keyword".into()));
        }

        let hdus = index_hdus(&mmap)?;
        Ok(Self { mmap, hdus })
    }

    pub fn hdu_count(&self) -> usize {
        self.hdus.len()
    }

    pub fn hdu(&self, ext: usize) -> Result<&HduInfo> {
        self.hdus.get(ext).ok_or_else(|| {
            GsnapError::InvalidFits(format!(
                "extension {} absent (file has {})",
                ext,
                self.hdus.len()
            ))
        })
    }

    /// Shape of the 2D image at an extension, without reading pixel data.
    pub fn image_dims(&self, ext: usize) -> Result<(usize, usize)> {
        let hdu = self.hdu(ext)?;
        hdu.dims().ok_or_else(|| {
            GsnapError::InvalidFits(format!(
                "extension {} is not a 2D image (NAXIS = {})",
                ext,
                hdu.naxes.len()
            ))
        })
    }

    /// Read the full 2D image at an extension, scaled to f32 detector units.
    pub fn read_image(&self, ext: usize) -> Result<Array2<f32>> {
        let (rows, _) = self.image_dims(ext)?;
        self.read_rows(ext, 0, rows)
    }

    /// Read a horizontal band `[row_start, row_end)` of the 2D image at an
    /// extension. Only the requested rows are decoded.
    pub fn read_rows(&self, ext: usize, row_start: usize, row_end: usize) -> Result<Array2<f32>> {
        let (rows, cols) = self.image_dims(ext)?;
        if row_start > row_end || row_end > rows {
            return Err(GsnapError::InvalidFits(format!(
                "row band {}..{} outside image of {} rows",
                row_start, row_end, rows
            )));
        }
        let hdu = self.hdu(ext)?;
        let esize = hdu.bytes_per_element();
        let row_bytes = cols * esize;

        let band_start = hdu.data_start + row_start * row_bytes;
        let band_end = hdu.data_start + row_end * row_bytes;
        if band_end > self.mmap.len() {
            return Err(GsnapError::InvalidFits("data truncated".into()));
        }
        let raw = &self.mmap[band_start..band_end];

        let scaled = hdu.bscale != 1.0 || hdu.bzero != 0.0;
        let mut data = Array2::<f32>::zeros((row_end - row_start, cols));
        for (i, out) in data.iter_mut().enumerate() {
            let idx = i * esize;
            let v = match hdu.bitpix {
                8 => raw[idx] as f64,
                16 => BigEndian::read_i16(&raw[idx..]) as f64,
                32 => BigEndian::read_i32(&raw[idx..]) as f64,
                64 => BigEndian::read_i64(&raw[idx..]) as f64,
                -32 => BigEndian::read_f32(&raw[idx..]) as f64,
                -64 => BigEndian::read_f64(&raw[idx..]),
                other => {
                    return Err(GsnapError::InvalidFits(format!(
                        "unsupported BITPIX {}",
                        other
                    )))
                }
            };
            *out = if scaled {
                (hdu.bzero + hdu.bscale * v) as f32
            } else {
                v as f32
            };
        }
        Ok(data)
    }
}

fn index_hdus(buf: &[u8]) -> Result<Vec<HduInfo>> {
    let mut hdus = Vec::new();
    let mut offset = 0;

    while offset + FITS_BLOCK <= buf.len() {
        let (hdu, next) = parse_hdu(buf, offset)?;
        hdus.push(hdu);
        offset = next;
    }

    if hdus.is_empty() {
        return Err(GsnapError::InvalidFits("no HDUs found".into()));
    }
    Ok(hdus)
}

/// Parse one HDU header starting at `offset`; returns the HDU and the
/// offset of the next one (past the padded data area).
fn parse_hdu(buf: &[u8], offset: usize) -> Result<(HduInfo, usize)> {
    let mut keywords = Vec::new();
    let mut pos = offset;
    let mut ended = false;

    while !ended {
        if pos + FITS_BLOCK > buf.len() {
            return Err(GsnapError::InvalidFits(
                "header not terminated by END".into(),
            ));
        }
        for card in buf[pos..pos + FITS_BLOCK].chunks_exact(CARD_LEN) {
            let name = std::str::from_utf8(&card[0..8])
                .map_err(|_| GsnapError::InvalidFits("non-ASCII header card".into()))?
                .trim_end()
                .to_string();
            if name == "END" {
                ended = true;
                break;
            }
            if name.is_empty() {
                continue;
            }
            keywords.push((name, parse_card_value(card)));
        }
        pos += FITS_BLOCK;
    }
    let header_end = pos;

    let lookup_int = |name: &str| -> Option<i64> {
        keywords.iter().find_map(|(k, v)| {
            if k == name {
                match v {
                    CardValue::Int(i) => Some(*i),
                    CardValue::Real(r) => Some(*r as i64),
                    _ => None,
                }
            } else {
                None
            }
        })
    };
    let lookup_f64 = |name: &str| -> Option<f64> {
        keywords.iter().find_map(|(k, v)| {
            if k == name {
                match v {
                    CardValue::Int(i) => Some(*i as f64),
                    CardValue::Real(r) => Some(*r),
                    _ => None,
                }
            } else {
                None
            }
        })
    };

    let bitpix = lookup_int("BITPIX")
        .ok_or_else(|| GsnapError::InvalidFits("missing BITPIX".into()))? as i32;
    match bitpix {
        8 | 16 | 32 | 64 | -32 | -64 => {}
        other => {
            return Err(GsnapError::InvalidFits(format!(
                "unsupported BITPIX {}",
                other
            )))
        }
    }
    let naxis =
        lookup_int("NAXIS").ok_or_else(|| GsnapError::InvalidFits("missing NAXIS".into()))?;
    if !(0..=8).contains(&naxis) {
        return Err(GsnapError::InvalidFits(format!("bad NAXIS {}", naxis)));
    }
    let mut naxes = Vec::with_capacity(naxis as usize);
    for n in 1..=naxis {
        let len = lookup_int(&format!("NAXIS{}", n))
            .ok_or_else(|| GsnapError::InvalidFits(format!("missing NAXIS{}", n)))?;
        if len < 0 {
            return Err(GsnapError::InvalidFits(format!("negative NAXIS{}", n)));
        }
        naxes.push(len as usize);
    }

    // Nbits = |BITPIX| * GCOUNT * (PCOUNT + prod(NAXISn)), per the standard.
    let gcount = lookup_int("GCOUNT").unwrap_or(1).max(0) as usize;
    let pcount = lookup_int("PCOUNT").unwrap_or(0).max(0) as usize;
    let prod: usize = if naxes.is_empty() {
        0
    } else {
        naxes.iter().product()
    };
    let data_len = (bitpix.unsigned_abs() as usize / 8) * gcount * (pcount + prod);
    let padded = data_len.div_ceil(FITS_BLOCK) * FITS_BLOCK;

    let hdu = HduInfo {
        bitpix,
        naxes,
        bscale: lookup_f64("BSCALE").unwrap_or(1.0),
        bzero: lookup_f64("BZERO").unwrap_or(0.0),
        keywords,
        data_start: header_end,
        data_len,
    };
    Ok((hdu, header_end + padded))
}

fn parse_card_value(card: &[u8]) -> CardValue {
    if &card[8..10] != b"= " {
        return CardValue::None;
    }
    let field = String::from_utf8_lossy(&card[10..CARD_LEN]).into_owned();
    let trimmed = field.trim();

    if let Some(rest) = trimmed.strip_prefix('\'') {
        // String value: up to the closing quote ('' escapes a quote).
        let text = match rest.find('\'') {
            Some(end) if !rest[end..].starts_with("''") => &rest[..end],
            _ => rest.trim_end_matches('\''),
        };
        return CardValue::Text(text.trim_end().to_string());
    }

    let value_part = trimmed.split('/').next().unwrap_or("").trim();
    match value_part {
        "T" => CardValue::Logical(true),
        "F" => CardValue::Logical(false),
        "" => CardValue::None,
        v => {
            if let Ok(i) = v.parse::<i64>() {
                CardValue::Int(i)
            } else if let Ok(r) = v.replace(['D', 'd'], "E").parse::<f64>() {
                CardValue::Real(r)
            } else {
                CardValue::Text(v.to_string())
            }
        }
    }
}

/// A header keyword destined for an output file.
#[derive(Clone, Debug)]
pub struct Keyword {
    pub name: String,
    pub value: CardValue,
    pub comment: String,
}

impl Keyword {
    pub fn int(name: &str, value: i64, comment: &str) -> Self {
        Self {
            name: name.into(),
            value: CardValue::Int(value),
            comment: comment.into(),
        }
    }

    pub fn real(name: &str, value: f64, comment: &str) -> Self {
        Self {
            name: name.into(),
            value: CardValue::Real(value),
            comment: comment.into(),
        }
    }

    pub fn text(name: &str, value: &str, comment: &str) -> Self {
        Self {
            name: name.into(),
            value: CardValue::Text(value.into()),
            comment: comment.into(),
        }
    }

    fn format_card(&self) -> [u8; CARD_LEN] {
        let value = match &self.value {
            CardValue::Logical(true) => format!("{:>20}", "T"),
            CardValue::Logical(false) => format!("{:>20}", "F"),
            CardValue::Int(v) => format!("{:>20}", v),
            CardValue::Real(v) => format!("{:>20}", format_real(*v)),
            CardValue::Text(v) => format!("'{:<8}'", v.replace('\'', "''")),
            CardValue::None => String::new(),
        };
        let body = if self.comment.is_empty() {
            format!("{:<8}= {}", self.name, value)
        } else {
            format!("{:<8}= {} / {}", self.name, value, self.comment)
        };
        ascii_card(&body)
    }
}

fn format_real(v: f64) -> String {
    let s = format!("{}", v);
    if s.contains('.') || s.contains('e') || s.contains('E') {
        s
    } else {
        format!("{}.0", s)
    }
}

fn ascii_card(body: &str) -> [u8; CARD_LEN] {
    let mut card = [b' '; CARD_LEN];
    for (i, b) in body.bytes().take(CARD_LEN).enumerate() {
        card[i] = b;
    }
    card
}

/// Write a single-HDU FITS file with BITPIX = -32 image data.
pub fn write_image(path: &Path, data: &Array2<f32>, keywords: &[Keyword]) -> Result<()> {
    let (rows, cols) = data.dim();
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    write_header(&mut w, -32, rows, cols, keywords)?;

    let mut buf = [0u8; 4];
    for &v in data.iter() {
        BigEndian::write_f32(&mut buf, v);
        w.write_all(&buf)?;
    }
    pad_block(&mut w, rows * cols * 4, 0)?;
    w.flush()?;
    Ok(())
}

/// Write a boolean mask as a BITPIX = 8 FITS file (1 = flagged).
pub fn write_mask(path: &Path, flags: &Array2<bool>, keywords: &[Keyword]) -> Result<()> {
    let (rows, cols) = flags.dim();
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    write_header(&mut w, 8, rows, cols, keywords)?;

    for &f in flags.iter() {
        w.write_all(&[u8::from(f)])?;
    }
    pad_block(&mut w, rows * cols, 0)?;
    w.flush()?;
    Ok(())
}

fn write_header(
    w: &mut impl Write,
    bitpix: i32,
    rows: usize,
    cols: usize,
    keywords: &[Keyword],
) -> Result<()> {
    let mut cards: Vec<[u8; CARD_LEN]> = Vec::new();
    cards.push(
        Keyword {
            name: "SIMPLE".into(),
            value: CardValue::Logical(true),
            comment: "conforms to FITS standard".into(),
        }
        .format_card(),
    );
    cards.push(Keyword::int("BITPIX", bitpix as i64, "array data type").format_card());
    cards.push(Keyword::int("NAXIS", 2, "number of array dimensions").format_card());
    cards.push(Keyword::int("NAXIS1", cols as i64, "").format_card());
    cards.push(Keyword::int("NAXIS2", rows as i64, "").format_card());
    for kw in keywords {
        cards.push(kw.format_card());
    }
    cards.push(ascii_card("END"));

    for card in &cards {
        w.write_all(card)?;
    }
    pad_block(w, cards.len() * CARD_LEN, b' ')?;
    Ok(())
}

fn pad_block(w: &mut impl Write, written: usize, fill: u8) -> Result<()> {
    let rem = written % FITS_BLOCK;
    if rem != 0 {
        let pad = vec![fill; FITS_BLOCK - rem];
        w.write_all(&pad)?;
    }
    Ok(())
}
