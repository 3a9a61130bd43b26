use std::collections::HashMap;
use std::sync::OnceLock;

use crate::value::ScalarValue;

type ConstantTable = HashMap<&'static str, HashMap<&'static str, ScalarValue>>;

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

fn table() -> &'static ConstantTable {
    static TABLE: OnceLock<ConstantTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut time = HashMap::new();
        for (idx, month) in MONTHS.iter().enumerate() {
            time.insert(*month, ScalarValue::Int(idx as i64 + 1));
        }
        // Zones are plain offsets in seconds east of UTC.
        time.insert("UTC", ScalarValue::Int(0));

        let mut out = HashMap::new();
        out.insert("time", time);
        out
    })
}

/// Resolves a package-qualified constant such as `time.March`.
pub fn lookup(package: &str, name: &str) -> Option<&'static ScalarValue> {
    table().get(package)?.get(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn months_and_utc() {
        assert_eq!(lookup("time", "January"), Some(&ScalarValue::Int(1)));
        assert_eq!(lookup("time", "December"), Some(&ScalarValue::Int(12)));
        assert_eq!(lookup("time", "UTC"), Some(&ScalarValue::Int(0)));
        assert_eq!(lookup("time", "Smarch"), None);
        assert_eq!(lookup("r", "January"), None);
    }
}
