//! Purchase-receipt feed.
//!
//! Pushes `CUX.CUX_RCV_HIS` rows to the purchasing system. The destination
//! schema requires grouped headers, so claimed rows are grouped by
//! company + factory + supplier before each push.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::basic_data::profile::ProfileStore;
use crate::basic_data::store::SqlTransportStore;
use crate::basic_data::worker::InterfaceSpec;
use crate::database::ConnectionManager;
use crate::ora::{ColumnDef, ColumnMapper, Entity, EntityMetadata, PrimaryKey, SqlType};

pub const INTERFACE_NAME: &str = "receipts";
pub const UPDATE_QUEUE: &str = "receipts-update";
pub const TRANSPORT_QUEUE: &str = "receipts-transport";

/// Marks source rows changed within the window as PENDING and reports the
/// count.
const MARK_UPDATES: &str = "\
BEGIN
  CUX.CUX_RCV_FEED_PKG.MARK_UPDATES(P_LOOKBACK_DAYS => :lookbackDays,
                                    P_DATE_FROM     => :dateFrom,
                                    P_DATE_TO       => :dateTo,
                                    P_MAX_ROW_NUM   => :maxRowNumber,
                                    X_BATCH_NUMBER  => :batchNumber,
                                    X_ROWS_UPDATED  => :rowsUpdated);
END;";

const BATCH_SEQUENCE: &str =
    "SELECT APPS.CUX_BASIC_DATA_BATCH_S.NEXTVAL AS SEQUENCE FROM DUAL";

const RECEIPT_COLUMNS: &[(&str, ColumnDef)] = &[
    ("transactionId", ColumnDef::new("TRANSACTION_ID", SqlType::Number)),
    ("organizationCode", ColumnDef::new("ORGANIZATION_CODE", SqlType::Varchar2)),
    ("storageLocation", ColumnDef::new("STORAGE_LOCATION", SqlType::Varchar2)),
    ("quantity", ColumnDef::new("QUANTITY", SqlType::Number)),
    ("receiveTime", ColumnDef::new("RECEIVE_TIME", SqlType::Varchar2)),
    ("materialNumber", ColumnDef::new("MATERIAL_NUMBER", SqlType::Varchar2)),
    ("purchaseUnit", ColumnDef::new("PURCHASE_UNIT", SqlType::Varchar2)),
    ("transactionType", ColumnDef::new("TRANSACTION_TYPE", SqlType::Varchar2)),
    ("currency", ColumnDef::new("CURRENCY", SqlType::Varchar2)),
    ("netPrice", ColumnDef::new("NET_PRICE", SqlType::Number)),
    ("voucherQuantity", ColumnDef::new("VOUCHER_QUANTITY", SqlType::Number)),
    ("voucherDate", ColumnDef::new("VOUCHER_DATE", SqlType::Varchar2)),
    ("deliveryNumber", ColumnDef::new("DELIVERY_NUMBER", SqlType::Varchar2)),
    ("orderNumber", ColumnDef::new("ORDER_NUMBER", SqlType::Varchar2)),
    ("orderItemNumber", ColumnDef::new("ORDER_ITEM_NUMBER", SqlType::Number)),
    ("supplierCode", ColumnDef::new("SUPPLIER_CODE", SqlType::Varchar2)),
    ("factory", ColumnDef::new("FACTORY", SqlType::Varchar2)),
    ("company", ColumnDef::new("COMPANY", SqlType::Varchar2)),
    ("processMessage", ColumnDef::new("PROCESS_MESSAGE", SqlType::Varchar2)),
    ("processStatus", ColumnDef::new("PROCESS_STATUS", SqlType::Varchar2)),
    ("transportBatch", ColumnDef::new("TRANSPORT_BATCH", SqlType::Number)),
    ("updateDate", ColumnDef::new("UPDATE_DATE", SqlType::Date)),
    ("updateBatch", ColumnDef::new("UPDATE_BATCH", SqlType::Number)),
];

pub static RECEIPT_METADATA: EntityMetadata = EntityMetadata {
    pool_alias: "ERP",
    schema: "CUX",
    table_name: Some("CUX_RCV_HIS"),
    base_query: None,
    primary_key: Some(PrimaryKey {
        field: "transactionId",
        column: "TRANSACTION_ID",
        sql_type: SqlType::Number,
        sequence: None,
    }),
    mapper: ColumnMapper::new(RECEIPT_COLUMNS),
};

/// Typed row of the receipt history table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReceiptHistory {
    pub id: Option<Value>,
    pub transaction_id: Option<i64>,
    pub organization_code: Option<String>,
    pub storage_location: Option<String>,
    pub quantity: Option<f64>,
    pub receive_time: Option<String>,
    pub material_number: Option<String>,
    pub purchase_unit: Option<String>,
    pub transaction_type: Option<String>,
    pub currency: Option<String>,
    pub net_price: Option<f64>,
    pub voucher_quantity: Option<f64>,
    pub voucher_date: Option<String>,
    pub delivery_number: Option<String>,
    pub order_number: Option<String>,
    pub order_item_number: Option<i64>,
    pub supplier_code: Option<String>,
    pub factory: Option<String>,
    pub company: Option<String>,
    pub process_message: Option<String>,
    pub process_status: Option<String>,
    pub transport_batch: Option<i64>,
    pub update_date: Option<String>,
    pub update_batch: Option<i64>,
}

impl Entity for ReceiptHistory {
    fn metadata() -> &'static EntityMetadata {
        &RECEIPT_METADATA
    }
}

fn text(row: &Map<String, Value>, field: &str) -> String {
    row.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn group_key(row: &Map<String, Value>) -> String {
    format!(
        "{}{}{}",
        text(row, "company"),
        text(row, "factory"),
        text(row, "supplierCode")
    )
}

/// Grouped-header payload the purchasing system expects.
fn wrap_group(rows: &[Map<String, Value>]) -> Value {
    let first = rows.first().cloned().unwrap_or_default();
    json!({
        "headList": [{
            "company": first.get("company").cloned().unwrap_or(Value::Null),
            "factory": first.get("factory").cloned().unwrap_or(Value::Null),
            "supplierCode": first.get("supplierCode").cloned().unwrap_or(Value::Null),
            "purchaseVoucherItemList": rows,
        }]
    })
}

pub const SPEC: InterfaceSpec = InterfaceSpec {
    name: INTERFACE_NAME,
    update_queue: UPDATE_QUEUE,
    transport_queue: TRANSPORT_QUEUE,
    key_field: "transactionId",
    group_key: Some(group_key),
    wrap_group,
};

pub fn store(manager: Arc<ConnectionManager>, profiles: Arc<ProfileStore>) -> SqlTransportStore {
    SqlTransportStore::new(
        manager,
        profiles,
        INTERFACE_NAME,
        &RECEIPT_METADATA,
        "transactionId",
        MARK_UPDATES,
        BATCH_SEQUENCE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(company: &str, factory: &str, supplier: &str) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("company".into(), json!(company));
        row.insert("factory".into(), json!(factory));
        row.insert("supplierCode".into(), json!(supplier));
        row.insert("transactionId".into(), json!(1));
        row
    }

    #[test]
    fn test_group_key_concatenates_composite() {
        assert_eq!(group_key(&row("1000", "F01", "S88")), "1000F01S88");
    }

    #[test]
    fn test_wrap_group_builds_grouped_header() {
        let rows = vec![row("1000", "F01", "S88"), row("1000", "F01", "S88")];
        let body = wrap_group(&rows);
        let head = &body["headList"][0];
        assert_eq!(head["company"], json!("1000"));
        assert_eq!(head["supplierCode"], json!("S88"));
        assert_eq!(
            head["purchaseVoucherItemList"].as_array().unwrap().len(),
            2
        );
    }

    #[test]
    fn test_metadata_is_valid() {
        RECEIPT_METADATA.validate().unwrap();
    }
}
