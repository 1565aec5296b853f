use std::fmt;

use arrow::datatypes::DataType;
use derive_new::new;

/// Stable identifier of a column within one normalization context. It's a dense index into
/// [`Catalog::columns`], so every id handed out by the catalog is valid for its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnId(pub usize);

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// use table name as id for simplicity
pub type TableId = String;

#[derive(new, Clone, Debug, PartialEq)]
pub struct ColumnDesc {
    pub name: String,
    pub data_type: DataType,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnCatalog {
    pub id: ColumnId,
    /// The table that produces the column, or `None` for columns synthesized by projections
    /// and aggregations.
    pub table_id: Option<TableId>,
    pub nullable: bool,
    pub desc: ColumnDesc,
}

impl ColumnCatalog {
    pub fn qualified_name(&self) -> String {
        match &self.table_id {
            Some(table) => format!("{}.{}", table, self.desc.name),
            None => self.desc.name.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableCatalog {
    pub id: TableId,
    /// column ids keep the order of the table's columns
    pub column_ids: Vec<ColumnId>,
}

/// Column and table metadata the binder resolved for one query. The normalizer reads
/// provenance and nullability from here.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    columns: Vec<ColumnCatalog>,
    tables: Vec<TableCatalog>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a base table. `columns` are `(name, type, nullable)` triples in table order.
    pub fn add_table(
        &mut self,
        name: &str,
        columns: &[(&str, DataType, bool)],
    ) -> TableCatalog {
        let column_ids = columns
            .iter()
            .map(|(col, data_type, nullable)| {
                self.add_column(Some(name.to_string()), col, data_type.clone(), *nullable)
            })
            .collect::<Vec<_>>();
        let table = TableCatalog {
            id: name.to_string(),
            column_ids,
        };
        self.tables.push(table.clone());
        table
    }

    /// Register a column produced by an operator rather than a table, e.g. a projection or
    /// an aggregate.
    pub fn add_synthesized_column(
        &mut self,
        name: &str,
        data_type: DataType,
        nullable: bool,
    ) -> ColumnId {
        self.add_column(None, name, data_type, nullable)
    }

    fn add_column(
        &mut self,
        table_id: Option<TableId>,
        name: &str,
        data_type: DataType,
        nullable: bool,
    ) -> ColumnId {
        let id = ColumnId(self.columns.len());
        self.columns.push(ColumnCatalog {
            id,
            table_id,
            nullable,
            desc: ColumnDesc::new(name.to_string(), data_type),
        });
        id
    }

    pub fn column(&self, id: ColumnId) -> Option<&ColumnCatalog> {
        self.columns.get(id.0)
    }

    pub fn columns(&self) -> &[ColumnCatalog] {
        &self.columns
    }

    pub fn get_table_by_name(&self, name: &str) -> Option<&TableCatalog> {
        self.tables.iter().find(|t| t.id == name)
    }

    /// Resolve a column by `table.column`, used by tests and tooling to refer to columns
    /// without keeping their ids around.
    pub fn get_column_by_name(&self, table: &str, name: &str) -> Option<ColumnId> {
        self.columns
            .iter()
            .find(|c| c.table_id.as_deref() == Some(table) && c.desc.name == name)
            .map(|c| c.id)
    }
}
