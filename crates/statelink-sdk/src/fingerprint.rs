//! 变更指纹
//!
//! 为每类数据生成短小、确定的指纹。下游只比较指纹是否相等来判断"是否变化"，
//! 因此语义相等的输入必须得到相同指纹：
//! - 集合类数据先排序再序列化（背包按槽位、Map 按键）
//! - 坐标量化到整格，低于一格的抖动不算变化
//! - 浮点数按固定精度格式化，-0.0 与 0.0 视为相同
//!
//! 不追求抗碰撞，只追求对变化的敏感度。

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// 指纹长度（十六进制字符数）
pub const FINGERPRINT_LEN: usize = 16;

/// 可生成规范化表示的数据
pub trait Fingerprint {
    /// 把规范化表示追加到 `out`
    fn canonicalize(&self, out: &mut String);
}

/// 指纹计算器
pub struct ChangeFingerprinter;

impl ChangeFingerprinter {
    pub fn fingerprint<T: Fingerprint + ?Sized>(value: &T) -> String {
        let mut canonical = String::new();
        value.canonicalize(&mut canonical);
        Self::digest(&canonical)
    }

    /// 对已规范化的字符串取摘要
    pub fn digest(canonical: &str) -> String {
        let hash = Sha256::digest(canonical.as_bytes());
        hex::encode(&hash[..FINGERPRINT_LEN / 2])
    }

    /// 固定精度格式化浮点数
    pub fn write_float(out: &mut String, value: f64, decimals: usize) {
        if value.is_nan() {
            out.push_str("nan");
            return;
        }
        let formatted = format!("{:.*}", decimals, value);
        // "-0.00" 与 "0.00" 语义相同
        if formatted.starts_with('-') && formatted[1..].chars().all(|c| c == '0' || c == '.') {
            out.push_str(&formatted[1..]);
        } else {
            out.push_str(&formatted);
        }
    }
}

impl Fingerprint for str {
    // 长度前缀，避免分隔符出现在内容中造成歧义
    fn canonicalize(&self, out: &mut String) {
        out.push_str(&self.len().to_string());
        out.push(':');
        out.push_str(self);
    }
}

impl Fingerprint for String {
    fn canonicalize(&self, out: &mut String) {
        self.as_str().canonicalize(out);
    }
}

impl Fingerprint for bool {
    fn canonicalize(&self, out: &mut String) {
        out.push(if *self { 'T' } else { 'F' });
    }
}

macro_rules! integer_fingerprint {
    ($($ty:ty),*) => {
        $(
            impl Fingerprint for $ty {
                fn canonicalize(&self, out: &mut String) {
                    out.push_str(&self.to_string());
                }
            }
        )*
    };
}

integer_fingerprint!(u8, u16, u32, u64, i32, i64, usize);

impl Fingerprint for f64 {
    fn canonicalize(&self, out: &mut String) {
        ChangeFingerprinter::write_float(out, *self, 2);
    }
}

impl<T: Fingerprint> Fingerprint for Option<T> {
    fn canonicalize(&self, out: &mut String) {
        match self {
            Some(value) => {
                out.push('S');
                value.canonicalize(out);
            }
            None => out.push('N'),
        }
    }
}

/// 有序序列：顺序即语义
impl<T: Fingerprint> Fingerprint for [T] {
    fn canonicalize(&self, out: &mut String) {
        out.push('[');
        for (i, item) in self.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            item.canonicalize(out);
        }
        out.push(']');
    }
}

impl<T: Fingerprint> Fingerprint for Vec<T> {
    fn canonicalize(&self, out: &mut String) {
        self.as_slice().canonicalize(out);
    }
}

impl<K: Fingerprint, V: Fingerprint> Fingerprint for BTreeMap<K, V> {
    fn canonicalize(&self, out: &mut String) {
        out.push('{');
        for (key, value) in self {
            key.canonicalize(out);
            out.push('=');
            value.canonicalize(out);
            out.push(';');
        }
        out.push('}');
    }
}

/// 无序 Map：按条目的规范化表示排序
impl<K: Fingerprint, V: Fingerprint, S> Fingerprint for HashMap<K, V, S> {
    fn canonicalize(&self, out: &mut String) {
        let mut entries: Vec<String> = self
            .iter()
            .map(|(key, value)| {
                let mut entry = String::new();
                key.canonicalize(&mut entry);
                entry.push('=');
                value.canonicalize(&mut entry);
                entry
            })
            .collect();
        entries.sort();

        out.push('{');
        for entry in entries {
            out.push_str(&entry);
            out.push(';');
        }
        out.push('}');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_inputs_give_equal_fingerprints() {
        let mut a = HashMap::new();
        let mut b = HashMap::new();
        for (k, v) in [("stone", 64u32), ("dirt", 12), ("torch", 3)] {
            a.insert(k.to_string(), v);
        }
        for (k, v) in [("torch", 3u32), ("stone", 64), ("dirt", 12)] {
            b.insert(k.to_string(), v);
        }
        assert_eq!(ChangeFingerprinter::fingerprint(&a), ChangeFingerprinter::fingerprint(&b));

        b.insert("dirt".to_string(), 13);
        assert_ne!(ChangeFingerprinter::fingerprint(&a), ChangeFingerprinter::fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_shape() {
        let fp = ChangeFingerprinter::fingerprint("hello");
        assert_eq!(fp.len(), FINGERPRINT_LEN);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_length_prefix_disambiguates() {
        let left = vec!["a,b".to_string()];
        let right = vec!["a".to_string(), "b".to_string()];
        assert_ne!(ChangeFingerprinter::fingerprint(&left), ChangeFingerprinter::fingerprint(&right));
    }

    #[test]
    fn test_float_normalization() {
        assert_eq!(ChangeFingerprinter::fingerprint(&-0.0f64), ChangeFingerprinter::fingerprint(&0.0f64));
        assert_eq!(ChangeFingerprinter::fingerprint(&10.001f64), ChangeFingerprinter::fingerprint(&10.0f64));
        assert_ne!(ChangeFingerprinter::fingerprint(&10.0f64), ChangeFingerprinter::fingerprint(&11.0f64));
        assert_ne!(
            ChangeFingerprinter::fingerprint(&Some(0u32)),
            ChangeFingerprinter::fingerprint(&None::<u32>)
        );
    }
}
