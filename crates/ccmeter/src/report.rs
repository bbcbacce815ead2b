//! Batch reporter
//!
//! Groups the aggregated hourly cells by the configured dimension and
//! renders table/CSV/JSON/summary output. Costs are computed on read from
//! the pricing provider.

use anyhow::Result;
use ccmeter_core::models::{AggregatedData, GroupBy, HourlyData, MonitorConfig, OutputFormat};
use ccmeter_core::pricing::PricingProvider;
use chrono::{Datelike, TimeZone};
use chrono_tz::Tz;
use comfy_table::{Cell, ContentArrangement, Table};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One output row.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub total_tokens: u64,
    pub message_count: u64,
    pub cost: f64,
}

impl ReportRow {
    fn absorb(&mut self, cell: &HourlyData, cost: f64) {
        self.input_tokens += cell.input_tokens;
        self.output_tokens += cell.output_tokens;
        self.cache_creation_tokens += cell.cache_creation_tokens;
        self.cache_read_tokens += cell.cache_read_tokens;
        self.total_tokens += cell.total_tokens;
        self.message_count += cell.message_count;
        self.cost += cost;
    }
}

/// Group, filter and order the rows for one report run.
pub fn build_rows(
    aggregated: &[Arc<AggregatedData>],
    config: &MonitorConfig,
    pricing: &PricingProvider,
    tz: Tz,
    cutoff: Option<i64>,
) -> Vec<ReportRow> {
    // group -> (rollup, model -> rollup)
    let mut groups: BTreeMap<String, (ReportRow, BTreeMap<String, ReportRow>)> = BTreeMap::new();

    for data in aggregated {
        for cell in &data.hourly_stats {
            if cutoff.is_some_and(|c| cell.hour < c) {
                continue;
            }
            let key = group_key(config.group_by, cell, tz);
            let cost = pricing.cost_of(
                &cell.model,
                cell.input_tokens,
                cell.output_tokens,
                cell.cache_creation_tokens,
                cell.cache_read_tokens,
            );

            let (rollup, per_model) = groups.entry(key.clone()).or_insert_with(|| {
                (
                    ReportRow {
                        group: key.clone(),
                        ..Default::default()
                    },
                    BTreeMap::new(),
                )
            });
            rollup.absorb(cell, cost);

            if config.breakdown {
                let model_row = per_model.entry(cell.model.clone()).or_insert_with(|| {
                    ReportRow {
                        group: key.clone(),
                        model: Some(cell.model.clone()),
                        ..Default::default()
                    }
                });
                model_row.absorb(cell, cost);
            }
        }
    }

    let mut rows = Vec::new();
    let mut emitted = 0usize;
    for (_, (rollup, per_model)) in groups {
        if config.limit > 0 && emitted >= config.limit {
            break;
        }
        rows.push(rollup);
        emitted += 1;
        for (_, model_row) in per_model {
            rows.push(model_row);
        }
    }
    rows
}

fn group_key(group_by: GroupBy, cell: &HourlyData, tz: Tz) -> String {
    let local = tz
        .timestamp_opt(cell.hour, 0)
        .single()
        .unwrap_or_else(|| tz.timestamp_opt(0, 0).single().unwrap());

    match group_by {
        GroupBy::Hour => local.format("%Y-%m-%d %H:00").to_string(),
        GroupBy::Day => local.format("%Y-%m-%d").to_string(),
        GroupBy::Week => {
            let week = local.iso_week();
            format!("{}-W{:02}", week.year(), week.week())
        }
        GroupBy::Month => local.format("%Y-%m").to_string(),
        GroupBy::Model => cell.model.clone(),
        GroupBy::Project => cell.project_name.clone(),
    }
}

/// Render rows in the configured output format.
pub fn render(rows: &[ReportRow], config: &MonitorConfig) -> Result<String> {
    match config.output_format {
        OutputFormat::Table => Ok(render_table(rows, config)),
        OutputFormat::Csv => Ok(render_csv(rows)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(rows)?),
        OutputFormat::Summary => Ok(render_summary(rows)),
    }
}

fn header(config: &MonitorConfig) -> &'static str {
    match config.group_by {
        GroupBy::Hour => "hour",
        GroupBy::Day => "day",
        GroupBy::Week => "week",
        GroupBy::Month => "month",
        GroupBy::Model => "model",
        GroupBy::Project => "project",
    }
}

fn render_table(rows: &[ReportRow], config: &MonitorConfig) -> String {
    let mut table = Table::new();
    table
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            header(config),
            "model",
            "input",
            "output",
            "cache create",
            "cache read",
            "total",
            "msgs",
            "cost (USD)",
        ]);

    for row in rows {
        let group = if row.model.is_some() {
            String::new() // breakdown sub-row
        } else {
            row.group.clone()
        };
        table.add_row(vec![
            Cell::new(group),
            Cell::new(row.model.clone().unwrap_or_default()),
            Cell::new(row.input_tokens),
            Cell::new(row.output_tokens),
            Cell::new(row.cache_creation_tokens),
            Cell::new(row.cache_read_tokens),
            Cell::new(row.total_tokens),
            Cell::new(row.message_count),
            Cell::new(format!("{:.4}", row.cost)),
        ]);
    }

    table.to_string()
}

fn render_csv(rows: &[ReportRow]) -> String {
    let mut out = String::from(
        "group,model,input_tokens,output_tokens,cache_creation_tokens,cache_read_tokens,total_tokens,message_count,cost\n",
    );
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{:.6}\n",
            csv_escape(&row.group),
            csv_escape(row.model.as_deref().unwrap_or("")),
            row.input_tokens,
            row.output_tokens,
            row.cache_creation_tokens,
            row.cache_read_tokens,
            row.total_tokens,
            row.message_count,
            row.cost
        ));
    }
    out
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn render_summary(rows: &[ReportRow]) -> String {
    // breakdown sub-rows would double-count
    let top: Vec<&ReportRow> = rows.iter().filter(|r| r.model.is_none()).collect();
    let total_tokens: u64 = top.iter().map(|r| r.total_tokens).sum();
    let input: u64 = top.iter().map(|r| r.input_tokens).sum();
    let output: u64 = top.iter().map(|r| r.output_tokens).sum();
    let cache_creation: u64 = top.iter().map(|r| r.cache_creation_tokens).sum();
    let cache_read: u64 = top.iter().map(|r| r.cache_read_tokens).sum();
    let messages: u64 = top.iter().map(|r| r.message_count).sum();
    let cost: f64 = top.iter().map(|r| r.cost).sum();

    format!(
        "Total tokens:   {total_tokens}\n  Input:        {input}\n  Output:       {output}\n  Cache create: {cache_creation}\n  Cache read:   {cache_read}\nMessages:       {messages}\nGroups:         {}\nCost:           ${cost:.4}\n",
        top.len()
    )
}
