//! Column layout of the authoritative table and the statements built from it.
//!
//! Staged rows travel to BigQuery as JSON string literals and are projected into typed columns
//! with `json_value`, so every statement here works from the same column list.

/// BigQuery type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Int64,
    Date,
    Json,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Int64 => "int64",
            ColumnType::Date => "date",
            ColumnType::Json => "json",
        }
    }

    /// Expression reading a column of this type from the JSON string `source`.
    fn extract(&self, source: &str, column: &str) -> String {
        match self {
            ColumnType::String => format!("json_value({source}, '$.{column}')"),
            ColumnType::Int64 => format!("cast(json_value({source}, '$.{column}') as int64)"),
            ColumnType::Date => format!("cast(json_value({source}, '$.{column}') as date)"),
            ColumnType::Json => format!("parse_json(json_query({source}, '$.{column}'))"),
        }
    }
}

/// A column of the authoritative table.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub typ: ColumnType,
    pub nullable: bool,
}

const fn column(name: &'static str, typ: ColumnType) -> Column {
    Column {
        name,
        typ,
        nullable: true,
    }
}

/// Name of the key column.
pub const KEY_COLUMN: &str = "registration";

/// Name of the column holding the change tag of a staged row.
pub const MODIFICATION_COLUMN: &str = "modification";

/// Value of [`MODIFICATION_COLUMN`] marking a staged delete.
pub const DELETED: &str = "DELETED";

/// Name of the staging column recording the position of a row within its batch.
pub const ORDER_COLUMN: &str = "staged_order";

/// Date column the authoritative table is partitioned on by day.
pub const PARTITION_COLUMN: &str = "last_mot_test_date";

/// Columns of the authoritative table, in table order.
pub const VEHICLE_COLUMNS: &[Column] = &[
    Column {
        name: KEY_COLUMN,
        typ: ColumnType::String,
        nullable: false,
    },
    column("make", ColumnType::String),
    column("model", ColumnType::String),
    column("primary_colour", ColumnType::String),
    column("secondary_colour", ColumnType::String),
    column("fuel_type", ColumnType::String),
    column("engine_size", ColumnType::Int64),
    column("manufacture_date", ColumnType::Date),
    column("registration_date", ColumnType::Date),
    column("first_used_date", ColumnType::Date),
    column("last_mot_test_date", ColumnType::Date),
    column("mot_tests", ColumnType::Json),
    column("last_test_date", ColumnType::Date),
    column("last_test_result", ColumnType::String),
    column("mileage", ColumnType::Int64),
    column("vehicle_age", ColumnType::Int64),
    column("pass_count", ColumnType::Int64),
    column("fail_count", ColumnType::Int64),
    column("mot_test_count", ColumnType::Int64),
    column("source_date", ColumnType::Date),
];

/// Columns of a staging table carried by every staged row: the table columns plus the change
/// tag.
fn staged_row_columns() -> impl Iterator<Item = Column> {
    VEHICLE_COLUMNS
        .iter()
        .copied()
        .chain(std::iter::once(column(MODIFICATION_COLUMN, ColumnType::String)))
}

/// Columns of a staging table: the staged row columns plus the row position.
pub fn staging_columns() -> impl Iterator<Item = Column> {
    staged_row_columns().chain(std::iter::once(column(ORDER_COLUMN, ColumnType::Int64)))
}

/// Column list of a `create table` statement.
pub fn columns_spec(columns: impl Iterator<Item = Column>) -> String {
    let columns: Vec<String> = columns
        .map(|column| {
            let not_null = if column.nullable { "" } else { " not null" };
            format!("`{}` {}{not_null}", column.name, column.typ.as_sql())
        })
        .collect();

    format!("({})", columns.join(", "))
}

fn column_list(columns: impl Iterator<Item = Column>) -> String {
    columns
        .map(|column| format!("`{}`", column.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `create table` statement for the authoritative table, partitioned by day on
/// [`PARTITION_COLUMN`]. Does nothing when the table exists.
pub fn create_table_statement(table: &str) -> String {
    format!(
        "create table if not exists {table} {} partition by `{PARTITION_COLUMN}`",
        columns_spec(VEHICLE_COLUMNS.iter().copied())
    )
}

/// `create or replace` statement for an empty staging table.
pub fn create_staging_table_statement(staging_table: &str) -> String {
    format!(
        "create or replace table {staging_table} {}",
        columns_spec(staging_columns())
    )
}

pub fn drop_table_statement(table: &str) -> String {
    format!("drop table if exists {table}")
}

/// `insert` statement appending JSON encoded rows to a staging table.
///
/// `rows` are already quoted string literals. The rows get consecutive positions starting at
/// `first_order`.
pub fn insert_staged_rows_statement(
    staging_table: &str,
    rows: &[String],
    first_order: u64,
) -> String {
    let projection = staged_row_columns()
        .map(|column| format!("{} as `{}`", column.typ.extract("r", column.name), column.name))
        .chain(std::iter::once(format!("{first_order} + o as `{ORDER_COLUMN}`")))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "insert into {staging_table} ({}) select {projection} from unnest([{}]) as r with offset as o",
        column_list(staging_columns()),
        rows.join(", ")
    )
}

/// `merge` statement applying every row of `staging_table` to `target_table`.
///
/// Matched rows tagged deleted are removed, other matched rows have every column replaced and
/// unmatched rows are inserted unless tagged deleted. The statement is atomic in BigQuery, so
/// either all staged changes land or none do.
pub fn merge_statement(target_table: &str, staging_table: &str) -> String {
    let assignments = VEHICLE_COLUMNS
        .iter()
        .filter(|column| column.name != KEY_COLUMN)
        .map(|column| format!("`{0}` = s.`{0}`", column.name))
        .collect::<Vec<_>>()
        .join(", ");
    let columns = column_list(VEHICLE_COLUMNS.iter().copied());
    let values = VEHICLE_COLUMNS
        .iter()
        .map(|column| format!("s.`{}`", column.name))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "merge {target_table} t using {staging_table} s on t.`{KEY_COLUMN}` = s.`{KEY_COLUMN}` \
         when matched and s.`{MODIFICATION_COLUMN}` = '{DELETED}' then delete \
         when matched then update set {assignments} \
         when not matched and s.`{MODIFICATION_COLUMN}` != '{DELETED}' then insert ({columns}) values ({values})"
    )
}

/// `create or replace` statement swapping the content of `target_table` for the rows of
/// `staging_table`.
///
/// Of several staged rows with the same key only the one staged last is kept. The new table is
/// partitioned like the one created by [`create_table_statement`].
pub fn replace_from_staging_statement(target_table: &str, staging_table: &str) -> String {
    format!(
        "create or replace table {target_table} {} partition by `{PARTITION_COLUMN}` \
         as select {} from {staging_table} where true \
         qualify row_number() over (partition by `{KEY_COLUMN}` order by `{ORDER_COLUMN}` desc) = 1",
        columns_spec(VEHICLE_COLUMNS.iter().copied()),
        column_list(VEHICLE_COLUMNS.iter().copied())
    )
}

pub fn count_rows_statement(table: &str) -> String {
    format!("select count(*) from {table}")
}

/// `select` statement returning which of `keys` are present in `table`.
///
/// `keys` are already quoted string literals.
pub fn matched_keys_statement(table: &str, keys: &[String]) -> String {
    format!(
        "select `{KEY_COLUMN}` from {table} where `{KEY_COLUMN}` in ({})",
        keys.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_columns_end_with_the_change_tag() {
        let columns: Vec<_> = staging_columns().map(|column| column.name).collect();

        assert_eq!(columns.first(), Some(&KEY_COLUMN));
        assert_eq!(
            &columns[columns.len() - 2..],
            [MODIFICATION_COLUMN, ORDER_COLUMN]
        );
        assert_eq!(columns.len(), VEHICLE_COLUMNS.len() + 2);
    }

    #[test]
    fn columns_spec_marks_the_key_required() {
        let spec = columns_spec(VEHICLE_COLUMNS.iter().copied().take(2));

        assert_eq!(spec, "(`registration` string not null, `make` string)");
    }

    #[test]
    fn merge_statement_handles_each_change_kind() {
        let statement = merge_statement("`p.d.motwot_main`", "`p.d.motwot_main_staging`");

        assert!(statement.starts_with(
            "merge `p.d.motwot_main` t using `p.d.motwot_main_staging` s on t.`registration` = s.`registration`"
        ));
        assert!(statement.contains("when matched and s.`modification` = 'DELETED' then delete"));
        assert!(statement.contains("when matched then update set `make` = s.`make`,"));
        assert!(!statement.contains("`registration` = s.`registration`,"));
        assert!(statement.contains(
            "when not matched and s.`modification` != 'DELETED' then insert (`registration`, `make`,"
        ));
        assert!(statement.ends_with("s.`source_date`)"));
    }

    #[test]
    fn insert_statement_projects_typed_columns() {
        let statement = insert_staged_rows_statement(
            "`p.d.staging`",
            &["'{\"registration\":\"A1\"}'".to_owned(), "'{}'".to_owned()],
            500,
        );

        assert!(statement.starts_with("insert into `p.d.staging` (`registration`, `make`,"));
        assert!(statement.contains(
            "cast(json_value(r, '$.engine_size') as int64) as `engine_size`"
        ));
        assert!(statement.contains(
            "cast(json_value(r, '$.first_used_date') as date) as `first_used_date`"
        ));
        assert!(statement.contains("parse_json(json_query(r, '$.mot_tests')) as `mot_tests`"));
        assert!(statement.contains("500 + o as `staged_order`"));
        assert!(statement.ends_with(
            "from unnest(['{\"registration\":\"A1\"}', '{}']) as r with offset as o"
        ));
    }

    #[test]
    fn authoritative_table_is_partitioned_by_last_test_day() {
        let create = create_table_statement("`p.d.motwot_main`");
        assert!(create.starts_with("create table if not exists `p.d.motwot_main` (`registration`"));
        assert!(create.ends_with("`source_date` date) partition by `last_mot_test_date`"));

        let replace = replace_from_staging_statement("`p.d.motwot_main`", "`p.d.staging`");
        assert!(replace.starts_with("create or replace table `p.d.motwot_main` (`registration`"));
        assert!(replace.contains(") partition by `last_mot_test_date` as select `registration`,"));
    }

    #[test]
    fn replace_keeps_the_row_staged_last_per_key() {
        let replace = replace_from_staging_statement("`p.d.motwot_main`", "`p.d.staging`");

        assert!(replace.contains("from `p.d.staging` where true"));
        assert!(replace.ends_with(
            "qualify row_number() over (partition by `registration` order by `staged_order` desc) = 1"
        ));
        assert!(!replace.contains("`modification`"));
    }

    #[test]
    fn matched_keys_statement_lists_keys() {
        let statement = matched_keys_statement("`p.d.t`", &["'A1'".to_owned(), "'B2'".to_owned()]);

        assert_eq!(
            statement,
            "select `registration` from `p.d.t` where `registration` in ('A1', 'B2')"
        );
    }
}
