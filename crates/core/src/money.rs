const NBSP: char = '\u{a0}';

/// Russian rouble rendering, e.g. `1 234,50 ₽`. Missing amounts render as a dash.
pub fn format_rub(amount: Option<f64>) -> String {
    let Some(amount) = amount.filter(|a| a.is_finite()) else {
        return "—".to_string();
    };
    let kopecks = (amount * 100.0).round() as i64;
    let sign = if kopecks < 0 { "-" } else { "" };
    let kopecks = kopecks.unsigned_abs();
    let rubles = (kopecks / 100).to_string();

    let mut grouped = String::with_capacity(rubles.len() + rubles.len() / 3);
    for (i, ch) in rubles.chars().enumerate() {
        if i > 0 && (rubles.len() - i) % 3 == 0 {
            grouped.push(NBSP);
        }
        grouped.push(ch);
    }

    format!("{sign}{grouped},{:02}{NBSP}₽", kopecks % 100)
}
