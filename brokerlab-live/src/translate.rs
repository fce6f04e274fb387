//! Order → venue order translation.
//!
//! The venue payload is a separate value built from an [`Order`]; the order
//! itself never carries venue fields beyond its free-form `info` map, whose
//! entries are forwarded as overrides.

use brokerlab_core::domain::{ExecType, Order, Side, Validity};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::venue::{VenueError, VenueOrderId, VenueResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VenueOrderType {
    #[serde(rename = "MKT")]
    Market,
    #[serde(rename = "MOC")]
    MarketOnClose,
    #[serde(rename = "LMT")]
    Limit,
    #[serde(rename = "STP")]
    Stop,
    #[serde(rename = "STPLMT")]
    StopLimit,
    #[serde(rename = "TRAIL")]
    Trail,
    #[serde(rename = "TRAIL LIMIT")]
    TrailLimit,
}

impl VenueOrderType {
    pub fn code(self) -> &'static str {
        match self {
            Self::Market => "MKT",
            Self::MarketOnClose => "MOC",
            Self::Limit => "LMT",
            Self::Stop => "STP",
            Self::StopLimit => "STPLMT",
            Self::Trail => "TRAIL",
            Self::TrailLimit => "TRAIL LIMIT",
        }
    }
}

impl From<ExecType> for VenueOrderType {
    fn from(exec_type: ExecType) -> Self {
        match exec_type {
            ExecType::Market => Self::Market,
            ExecType::Close => Self::MarketOnClose,
            ExecType::Limit => Self::Limit,
            ExecType::Stop => Self::Stop,
            ExecType::StopLimit => Self::StopLimit,
            ExecType::StopTrail => Self::Trail,
            ExecType::StopTrailLimit => Self::TrailLimit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TimeInForce {
    #[serde(rename = "GTC")]
    Gtc,
    #[serde(rename = "DAY")]
    Day,
    /// Good till date, formatted `%Y%m%d %H:%M:%S`.
    #[serde(rename = "GTD")]
    Gtd(String),
}

/// Venue-side representation of one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueOrder {
    pub order_id: VenueOrderId,
    pub client_id: i32,
    pub symbol: String,
    /// `"BUY"` or `"SELL"`.
    pub action: String,
    /// Always positive.
    pub quantity: f64,
    pub order_type: VenueOrderType,
    pub limit_price: Option<f64>,
    /// Stop trigger price, or the trail amount for trailing orders.
    pub aux_price: Option<f64>,
    pub trail_stop_price: Option<f64>,
    /// In percent units (5.0 = 5%).
    pub trailing_percent: Option<f64>,
    pub tif: TimeInForce,
    pub oca_group: String,
    pub parent_id: Option<VenueOrderId>,
    pub transmit: bool,
    /// Venue-specific overrides copied from the order's `info`.
    pub extra: Map<String, Value>,
}

/// Identifiers the venue needs that the order does not carry.
#[derive(Debug, Clone)]
pub struct VenueIds {
    pub order_id: VenueOrderId,
    pub client_id: i32,
    pub oca_group: String,
    pub parent_id: Option<VenueOrderId>,
}

pub fn translate(order: &Order, ids: VenueIds) -> VenueResult<VenueOrder> {
    let created = &order.created;
    let order_type = VenueOrderType::from(order.exec_type);
    let require = |value: Option<f64>, what: &str| {
        value.ok_or_else(|| {
            VenueError::InvalidOrder(format!("{} order {} needs a {what}", order_type.code(), order.reference))
        })
    };

    let (mut limit_price, mut aux_price, mut trail_stop_price, mut trailing_percent) =
        (None, None, None, None);
    match order.exec_type {
        ExecType::Market | ExecType::Close => {}
        ExecType::Limit => limit_price = Some(require(created.price, "price")?),
        ExecType::Stop => aux_price = Some(require(created.price, "stop price")?),
        ExecType::StopLimit => {
            aux_price = Some(require(created.price, "stop price")?);
            limit_price = Some(require(created.price_limit, "limit price")?);
        }
        ExecType::StopTrail | ExecType::StopTrailLimit => {
            match (created.trail_amount, created.trail_percent) {
                (Some(amount), _) => aux_price = Some(amount),
                (None, Some(percent)) => trailing_percent = Some(percent * 100.0),
                (None, None) => {
                    return Err(VenueError::InvalidOrder(format!(
                        "trailing order {} needs a trail amount or percent",
                        order.reference
                    )))
                }
            }
            if order.exec_type == ExecType::StopTrailLimit {
                trail_stop_price = Some(require(created.price, "stop price")?);
                limit_price = Some(require(created.price_limit, "limit price")?);
            }
        }
    }

    let tif = match order.valid {
        Validity::Gtc => TimeInForce::Gtc,
        Validity::Day => TimeInForce::Day,
        Validity::Until { at } => TimeInForce::Gtd(at.format("%Y%m%d %H:%M:%S").to_string()),
    };

    Ok(VenueOrder {
        order_id: ids.order_id,
        client_id: ids.client_id,
        symbol: order.symbol.clone(),
        action: match order.side {
            Side::Buy => "BUY".to_string(),
            Side::Sell => "SELL".to_string(),
        },
        quantity: order.size().abs(),
        order_type,
        limit_price,
        aux_price,
        trail_stop_price,
        trailing_percent,
        tif,
        oca_group: ids.oca_group,
        parent_id: ids.parent_id,
        transmit: order.transmit,
        extra: order.info.clone(),
    })
}
