use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::item::TreeItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortColumn {
    #[default]
    Name,
    Size,
    Type,
    Modified,
    Created,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SortSpec {
    pub column: SortColumn,
    pub direction: SortDirection,
}

/// Total order over sibling items.
///
/// Category partition comes first and is never flipped by the direction:
/// folders precede non-drive files, which precede drives. Within a
/// category the requested column compares, ties break on natural
/// case-insensitive display names, and as a last resort on the absolute
/// path, so two distinct siblings never compare equal.
pub fn compare_items(a: &TreeItem, b: &TreeItem, spec: SortSpec) -> Ordering {
    let by_category = category_of(a).cmp(&category_of(b));
    if by_category != Ordering::Equal {
        return by_category;
    }

    let within = if a.is_drive {
        natural_cmp(&a.path.to_string_lossy(), &b.path.to_string_lossy())
            .then_with(|| a.path.cmp(&b.path))
    } else {
        column_cmp(a, b, spec.column)
            .then_with(|| natural_cmp(&a.display_name, &b.display_name))
            .then_with(|| a.path.cmp(&b.path))
    };

    match spec.direction {
        SortDirection::Ascending => within,
        SortDirection::Descending => within.reverse(),
    }
}

fn category_of(item: &TreeItem) -> u8 {
    if item.is_drive {
        2
    } else if item.is_folder {
        0
    } else {
        1
    }
}

fn column_cmp(a: &TreeItem, b: &TreeItem, column: SortColumn) -> Ordering {
    match column {
        SortColumn::Name => natural_cmp(&a.display_name, &b.display_name),
        SortColumn::Size => a.size.cmp(&b.size),
        SortColumn::Type => natural_cmp(&a.type_label, &b.type_label),
        SortColumn::Modified => a.modified.cmp(&b.modified),
        SortColumn::Created => a.created.cmp(&b.created),
    }
}

/// Case-insensitive comparison where digit runs compare by numeric value,
/// so "file2" sorts before "file10".
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut lhs = a.chars().peekable();
    let mut rhs = b.chars().peekable();

    loop {
        match (lhs.peek().copied(), rhs.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) => {
                if ca.is_ascii_digit() && cb.is_ascii_digit() {
                    let run_a = take_digit_run(&mut lhs);
                    let run_b = take_digit_run(&mut rhs);
                    let by_value = cmp_digit_runs(&run_a, &run_b);
                    if by_value != Ordering::Equal {
                        return by_value;
                    }
                } else {
                    let fa = fold_char(ca);
                    let fb = fold_char(cb);
                    if fa != fb {
                        return fa.cmp(&fb);
                    }
                    lhs.next();
                    rhs.next();
                }
            }
        }
    }
}

fn fold_char(ch: char) -> char {
    ch.to_lowercase().next().unwrap_or(ch)
}

fn take_digit_run(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(ch) = chars.peek().copied() {
        if !ch.is_ascii_digit() {
            break;
        }
        run.push(ch);
        chars.next();
    }
    run
}

fn cmp_digit_runs(a: &str, b: &str) -> Ordering {
    let stripped_a = a.trim_start_matches('0');
    let stripped_b = b.trim_start_matches('0');
    stripped_a
        .len()
        .cmp(&stripped_b.len())
        .then_with(|| stripped_a.cmp(stripped_b))
}
