use crate::eval::{EvalError, EvalResult};
use crate::value::ScalarValue;

use super::str_arg;

const NAME: &str = "fmt.Sprintf";

#[derive(Default)]
struct Spec {
    left_align: bool,
    zero_pad: bool,
    plus: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

/// `fmt.Sprintf(format, args...)` with the printf verbs `%v %s %d %f %t %q %x %%`.
///
/// Bad verbs and argument count mismatches render inline (`%!d(string=x)`, `%!v(MISSING)`,
/// `%!(EXTRA int=1)`) instead of failing, the way printf-style formatters usually report them.
pub(super) fn sprintf(args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    if args.len() < 2 {
        return Err(EvalError::function(
            NAME,
            format!("requires at least 2 args, {} supplied", args.len()),
        ));
    }
    let format = str_arg(NAME, &args[0])?;
    let mut values = args[1..].iter();
    let mut out = String::with_capacity(format.len() + 16);

    let mut chars = format.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }

        let mut spec = Spec::default();
        while let Some(flag) = chars.peek().copied() {
            match flag {
                '-' => spec.left_align = true,
                '0' => spec.zero_pad = true,
                '+' => spec.plus = true,
                _ => break,
            }
            chars.next();
        }
        spec.width = take_number(&mut chars);
        if chars.peek() == Some(&'.') {
            chars.next();
            spec.precision = Some(take_number(&mut chars).unwrap_or(0));
        }

        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        let Some(value) = values.next() else {
            out.push_str(&format!("%!{verb}(MISSING)"));
            continue;
        };
        let rendered = render(verb, &spec, value);
        pad_into(&mut out, &rendered, &spec, value.is_numeric());
    }

    for extra in values {
        out.push_str(&format!("%!(EXTRA {}={extra})", extra.value_type()));
    }
    Ok(ScalarValue::Str(out))
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut digits = String::new();
    while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
        digits.push(c);
        chars.next();
    }
    digits.parse().ok()
}

fn bad_verb(verb: char, value: &ScalarValue) -> String {
    format!("%!{verb}({}={value})", value.value_type())
}

fn render(verb: char, spec: &Spec, value: &ScalarValue) -> String {
    match (verb, value) {
        ('v' | 's', ScalarValue::Float(v)) if spec.precision.is_some() => {
            format!("{v:.*}", spec.precision.unwrap_or_default())
        }
        ('v' | 's', ScalarValue::Str(s)) => match spec.precision {
            Some(p) => s.chars().take(p).collect(),
            None => s.clone(),
        },
        ('v' | 's', v) => with_sign(spec, v.to_string(), v),
        ('d', ScalarValue::Int(v)) => with_sign(spec, v.to_string(), value),
        ('f' | 'F', ScalarValue::Float(v)) => {
            with_sign(spec, format!("{v:.*}", spec.precision.unwrap_or(6)), value)
        }
        ('f' | 'F', ScalarValue::Decimal(d)) => with_sign(
            spec,
            format!("{:.*}", spec.precision.unwrap_or(6), d.to_f64()),
            value,
        ),
        ('t', ScalarValue::Bool(b)) => b.to_string(),
        ('q', ScalarValue::Str(s)) => format!("{s:?}"),
        ('x', ScalarValue::Int(v)) if *v < 0 => format!("-{:x}", v.unsigned_abs()),
        ('x', ScalarValue::Int(v)) => format!("{v:x}"),
        ('X', ScalarValue::Int(v)) => format!("{v:X}"),
        ('x', ScalarValue::Str(s)) => s.bytes().map(|b| format!("{b:02x}")).collect(),
        _ => bad_verb(verb, value),
    }
}

fn with_sign(spec: &Spec, rendered: String, value: &ScalarValue) -> String {
    if spec.plus && value.is_numeric() && !rendered.starts_with('-') {
        format!("+{rendered}")
    } else {
        rendered
    }
}

fn pad_into(out: &mut String, rendered: &str, spec: &Spec, numeric: bool) {
    let len = rendered.chars().count();
    let pad = spec.width.unwrap_or(0).saturating_sub(len);
    if pad == 0 {
        out.push_str(rendered);
    } else if spec.left_align {
        out.push_str(rendered);
        out.extend(std::iter::repeat(' ').take(pad));
    } else if spec.zero_pad && numeric {
        let (sign, digits) = match rendered.strip_prefix(['-', '+']) {
            Some(rest) => rendered.split_at(rendered.len() - rest.len()),
            None => ("", rendered),
        };
        out.push_str(sign);
        out.extend(std::iter::repeat('0').take(pad));
        out.push_str(digits);
    } else {
        out.extend(std::iter::repeat(' ').take(pad));
        out.push_str(rendered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Decimal2;
    use pretty_assertions::assert_eq;

    fn fmt(args: Vec<ScalarValue>) -> String {
        match sprintf(&args).unwrap() {
            ScalarValue::Str(s) => s,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn common_verbs() {
        assert_eq!(
            fmt(vec![
                "%s-%d-%.2f-%t-%v%%".into(),
                "a".into(),
                ScalarValue::Int(7),
                ScalarValue::Float(3.14159),
                ScalarValue::Bool(true),
                ScalarValue::Decimal(Decimal2::from_cents(250)),
            ]),
            "a-7-3.14-true-2.5%"
        );
    }

    #[test]
    fn width_and_padding() {
        assert_eq!(fmt(vec!["[%5d]".into(), ScalarValue::Int(42)]), "[   42]");
        assert_eq!(fmt(vec!["[%-5s]".into(), "ab".into()]), "[ab   ]");
        assert_eq!(fmt(vec!["[%05d]".into(), ScalarValue::Int(-42)]), "[-0042]");
        assert_eq!(fmt(vec!["%03d".into(), ScalarValue::Int(7)]), "007");
    }

    #[test]
    fn mismatches_render_inline() {
        assert_eq!(fmt(vec!["%d".into(), "x".into()]), "%!d(string=x)");
        assert_eq!(fmt(vec!["%s %s".into(), "x".into()]), "x %!s(MISSING)");
        assert_eq!(
            fmt(vec!["%s".into(), "x".into(), ScalarValue::Int(1)]),
            "x%!(EXTRA int=1)"
        );
    }

    #[test]
    fn requires_format_and_one_arg() {
        assert!(sprintf(&["%d".into()]).is_err());
        assert!(sprintf(&[ScalarValue::Int(1), ScalarValue::Int(1)]).is_err());
    }
}
