use serde_json::Value;

pub mod connectivity;

// Render a listing response ({"status":"ok","<key>":[{..},..]}) as an ASCII table.
// Returns true if a table was printed, false otherwise (caller falls back to JSON).
pub fn print_listing(val: &Value, key: &str) -> bool {
    // Honor env override to force JSON output
    if std::env::var("PASH_OUTPUT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false) {
        return false;
    }
    let Some(Value::Array(arr)) = val.get(key) else { return false; };
    if arr.is_empty() {
        println!("(no {})", key);
        return true;
    }
    // Columns are the union of keys across all rows, sorted.
    let mut all_keys: Vec<String> = Vec::new();
    for el in arr {
        if let Value::Object(map) = el {
            for k in map.keys() { if !all_keys.contains(k) { all_keys.push(k.clone()); } }
        } else {
            return false;
        }
    }
    if all_keys.is_empty() { return false; }
    all_keys.sort();
    let mut rows: Vec<Vec<String>> = Vec::with_capacity(arr.len());
    for el in arr {
        if let Value::Object(map) = el {
            rows.push(all_keys.iter().map(|k| to_cell_string(map.get(k).unwrap_or(&Value::Null))).collect());
        }
    }

    // Cap cell width to what the terminal can show; 80 when not a tty
    let max_col_width: usize = match terminal_size::terminal_size() {
        Some((terminal_size::Width(w), _)) => {
            let per_col = (w as usize).saturating_sub(all_keys.len() * 3 + 1) / all_keys.len();
            per_col.max(8)
        }
        None => 80,
    };
    let mut widths: Vec<usize> = all_keys.iter().map(|s| s.chars().count().min(max_col_width)).collect();
    for r in &rows {
        for (i, cell) in r.iter().enumerate().take(all_keys.len()) {
            let w = display_len(cell);
            if w > widths[i] { widths[i] = w.min(max_col_width); }
        }
    }

    // Header
    let sep = build_separator(&widths);
    println!("{}", sep);
    println!("{}", build_row(&all_keys, &widths));
    println!("{}", sep);
    // Rows
    for r in &rows {
        println!("{}", build_row(r, &widths));
    }
    println!("{}", sep);
    println!("rows: {}, cols: {}", rows.len(), all_keys.len());
    true
}

// Print a flat object as aligned "key : value" lines (whoami, status).
pub fn print_kv(val: &Value) {
    match val {
        Value::Object(map) => {
            let width = map.keys().map(|k| k.chars().count()).max().unwrap_or(0);
            for (k, v) in map {
                match v {
                    Value::Object(_) => {
                        println!("{:width$} :", k, width = width);
                        if let Value::Object(inner) = v {
                            let iw = inner.keys().map(|k| k.chars().count()).max().unwrap_or(0);
                            for (ik, iv) in inner {
                                println!("  {:iw$} : {}", ik, to_cell_string(iv), iw = iw);
                            }
                        }
                    }
                    _ => println!("{:width$} : {}", k, to_cell_string(v), width = width),
                }
            }
        }
        other => println!("{}", other),
    }
}

fn to_cell_string(v: &Value) -> String {
    match v {
        Value::Null => String::from("NULL"),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        // keep objects/arrays compact
        other => other.to_string(),
    }
}

fn display_len(s: &str) -> usize { s.chars().count() }

fn build_separator(widths: &[usize]) -> String {
    let mut s = String::new();
    s.push('+');
    for w in widths {
        s.push_str(&"-".repeat(*w + 2));
        s.push('+');
    }
    s
}

fn build_row(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::new();
    s.push('|');
    for (i, w) in widths.iter().enumerate() {
        let cell = cells.get(i).cloned().unwrap_or_default();
        let (text, align_right) = (truncate(&cell, *w), is_numeric_like(&cell));
        s.push(' ');
        if align_right {
            let pad = w.saturating_sub(display_len(&text));
            s.push_str(&" ".repeat(pad));
            s.push_str(&text);
        } else {
            s.push_str(&text);
            let pad = w.saturating_sub(display_len(&text));
            s.push_str(&" ".repeat(pad));
        }
        s.push(' ');
        s.push('|');
    }
    s
}

fn truncate(s: &str, max: usize) -> String {
    let len = s.chars().count();
    if len <= max { return s.to_string(); }
    if max <= 1 { return "…".to_string(); }
    let take = max - 1;
    s.chars().take(take).collect::<String>() + "…"
}

fn is_numeric_like(s: &str) -> bool {
    // crude detection for aligning numbers to right
    let st = s.trim();
    if st.is_empty() { return false; }
    let mut has_digit = false;
    for ch in st.chars() {
        if ch.is_ascii_digit() { has_digit = true; continue; }
        if ".-+eE,_".contains(ch) { continue; }
        return false;
    }
    has_digit
}
