use std::fmt::{self, Display, Formatter};

use tabled::{builder::Builder, settings::Style as TableStyle};

use super::painter::Painter;

/// A rounded table that renders via `Display`.
#[derive(Debug)]
pub(crate) struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub(crate) fn grid(
        headers: impl IntoIterator<Item = impl Into<String>>,
        rows: Vec<Vec<String>>,
    ) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    /// Two-column field/value table with muted field names.
    pub(crate) fn key_value(painter: &Painter, rows: Vec<(&str, String)>) -> Self {
        let records = rows
            .into_iter()
            .map(|(field, value)| vec![painter.muted(field), value])
            .collect();
        Self::grid(["field", "value"], records)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut builder = Builder::default();
        builder.push_record(&self.headers);
        for row in &self.rows {
            builder.push_record(row);
        }
        let mut table = builder.build();
        table.with(TableStyle::rounded());
        write!(f, "{table}")
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    #[test]
    fn grid_renders_headers_before_rows() {
        let table = Table::grid(
            ["id", "rssi"],
            vec![
                vec!["AA:BB".into(), "-40".into()],
                vec!["CC:DD".into(), "-70".into()],
            ],
        );
        assert_snapshot!(table.to_string(), @"
        ╭───────┬──────╮
        │ id    │ rssi │
        ├───────┼──────┤
        │ AA:BB │ -40  │
        │ CC:DD │ -70  │
        ╰───────┴──────╯
        ");
    }

    #[test]
    fn key_value_uses_field_value_headers() {
        let painter = Painter::new(false);
        let table = Table::key_value(&painter, vec![("device", "AA:BB".into())]);

        assert!(!table.is_empty());
        assert_snapshot!(table.to_string(), @"
        ╭────────┬───────╮
        │ field  │ value │
        ├────────┼───────┤
        │ device │ AA:BB │
        ╰────────┴───────╯
        ");
    }
}
