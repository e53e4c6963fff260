use thiserror::Error;

/// Length of an EAN-13 code
pub const EAN13_LEN: usize = 13;

const PREFIX_LEN: usize = 2;
const ITEM_CODE_LEN: usize = 5;
const VALUE_LEN: usize = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BarcodeError {
    #[error("Barcode must have 13 digits, got {0} characters")]
    InvalidLength(usize),

    #[error("Barcode contains a non-digit character at position {0}")]
    NonDigit(usize),

    #[error("Not a scale label (prefix {0})")]
    NotScaleLabel(String),

    #[error("Check digit mismatch: expected {expected}, found {found}")]
    CheckDigit { expected: u8, found: u8 },
}

/// What the value field of a scale label encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleKind {
    /// Total price, in currency units
    Price,
    /// Net weight, in kilograms
    Weight,
}

/// A decoded scale label.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleBarcode {
    pub prefix: String,
    pub item_code: String,
    pub kind: ScaleKind,
    pub value: f64,
}

impl ScaleBarcode {
    pub fn weight_kg(&self) -> Option<f64> {
        (self.kind == ScaleKind::Weight).then_some(self.value)
    }

    pub fn price(&self) -> Option<f64> {
        (self.kind == ScaleKind::Price).then_some(self.value)
    }
}

/// EAN-13 check digit for the first 12 digits (weights 1,3,1,3,...).
pub fn ean13_check_digit(digits: &[u8]) -> u8 {
    let sum: u32 = digits
        .iter()
        .take(EAN13_LEN - 1)
        .enumerate()
        .map(|(i, d)| u32::from(*d) * if i % 2 == 0 { 1 } else { 3 })
        .sum();
    ((10 - sum % 10) % 10) as u8
}

fn digits_of(code: &str) -> Result<Vec<u8>, BarcodeError> {
    code.bytes()
        .enumerate()
        .map(|(i, b)| {
            if b.is_ascii_digit() {
                Ok(b - b'0')
            } else {
                Err(BarcodeError::NonDigit(i))
            }
        })
        .collect()
}

/// Validate a full EAN-13 code, including its check digit.
pub fn validate_ean13(code: &str) -> Result<(), BarcodeError> {
    let code = code.trim();
    if code.len() != EAN13_LEN {
        return Err(BarcodeError::InvalidLength(code.chars().count()));
    }
    let digits = digits_of(code)?;
    let expected = ean13_check_digit(&digits);
    let found = digits[EAN13_LEN - 1];
    if expected != found {
        return Err(BarcodeError::CheckDigit { expected, found });
    }
    Ok(())
}

/// True for the in-store range reserved for scale labels (first digit 2).
pub fn is_scale_barcode(code: &str) -> bool {
    let code = code.trim();
    code.len() == EAN13_LEN && code.starts_with('2') && code.bytes().all(|b| b.is_ascii_digit())
}

/// Decode a scale-printed label: `PP IIIII VVVVV C`.
///
/// Prefixes 20-24 carry a price in cents, 25-29 a weight in grams.
///
/// The value field is always read as a 5-digit integer in the unit above, so
/// `2500012340005` is item `00012` weighing 34.000 kg. Labels that print
/// 0.340 kg encode it as `2500012003405`. Scales that pack the value with a
/// different item/value split are not recognised.
pub fn decode_scale_barcode(code: &str) -> Result<ScaleBarcode, BarcodeError> {
    validate_ean13(code)?;
    let code = code.trim();

    let prefix = &code[..PREFIX_LEN];
    let kind = match prefix.as_bytes() {
        [b'2', b'0'..=b'4'] => ScaleKind::Price,
        [b'2', b'5'..=b'9'] => ScaleKind::Weight,
        _ => return Err(BarcodeError::NotScaleLabel(prefix.to_string())),
    };

    let item_code = &code[PREFIX_LEN..PREFIX_LEN + ITEM_CODE_LEN];
    let raw = &code[PREFIX_LEN + ITEM_CODE_LEN..PREFIX_LEN + ITEM_CODE_LEN + VALUE_LEN];
    let raw: u32 = raw.parse().map_err(|_| BarcodeError::NonDigit(PREFIX_LEN + ITEM_CODE_LEN))?;
    let value = match kind {
        ScaleKind::Price => f64::from(raw) / 100.0,
        ScaleKind::Weight => f64::from(raw) / 1000.0,
    };

    Ok(ScaleBarcode {
        prefix: prefix.to_string(),
        item_code: item_code.to_string(),
        kind,
        value,
    })
}
