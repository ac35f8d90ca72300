//! Report summary route

use crate::generator::python::{Source, comment_text, string_literal};
use crate::models::naming::capitalize;
use crate::models::{Aggregate, AnalyticsConfig, ReportMode};

pub fn routes(config: &AnalyticsConfig) -> String {
    let mut source = Source::new();
    source
        .line("from flask import request, jsonify")
        .line("from app import db")
        .line("from app.models import *")
        .line("from app.routes import api_bp")
        .line("from sqlalchemy import func")
        .blank()
        .line("@api_bp.route('/analytics/summary', methods=['GET'])")
        .line("def get_analytics_summary():")
        .line("    results = {}");

    for report in &config.reports {
        let Some(entity) = report.entity() else {
            continue;
        };
        let class = capitalize(entity);
        let key = string_literal(&report.name);

        match report.mode {
            ReportMode::Advanced => {
                let Some(expression) = report.expression.as_deref().filter(|e| !e.trim().is_empty())
                else {
                    continue;
                };
                source
                    .line(format!("    # Advanced Expression: {}", comment_text(expression)))
                    .line(format!(
                        "    query = db.session.query(db.text({})).select_from({class})",
                        string_literal(expression)
                    ))
                    .line(format!("    results[{key}] = query.scalar() or 0"));
            }
            ReportMode::Simple => {
                let aggregate = report.aggregate.as_str();
                let field = report.field_or_id();
                match report.group_by() {
                    Some(group_by) => {
                        let target = if report.aggregate == Aggregate::Count {
                            format!("{class}.id")
                        } else {
                            format!("{class}.{field}")
                        };
                        source
                            .line(format!(
                                "    # Grouped Aggregation: {aggregate} of {field} by {group_by}"
                            ))
                            .line(format!(
                                "    query = db.session.query({class}.{group_by}, func.{aggregate}({target})).group_by({class}.{group_by}).all()"
                            ))
                            .line(format!(
                                "    results[{key}] = {{str(row[0]): row[1] for row in query}}"
                            ));
                    }
                    None if report.aggregate == Aggregate::Count => {
                        source.line(format!("    results[{key}] = {class}.query.count()"));
                    }
                    None => {
                        source.line(format!(
                            "    results[{key}] = db.session.query(func.{aggregate}({class}.{field})).scalar() or 0"
                        ));
                    }
                }
            }
        }
    }

    source.line("    return jsonify(results)");
    source.finish()
}
