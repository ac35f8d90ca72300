//! SQLAlchemy models and REST routes for CRUD tables

use crate::generator::Blueprint;
use crate::generator::python::{Source, literal, string_literal};
use crate::models::naming::capitalize;
use crate::models::{FieldSpec, FieldType};

/// Column constructor argument for a field type
pub fn column_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::String => "db.String(120)",
        FieldType::Text => "db.Text",
        FieldType::Integer => "db.Integer",
        FieldType::Float => "db.Float",
        FieldType::Boolean => "db.Boolean",
        FieldType::Datetime => "db.DateTime, default=datetime.utcnow",
    }
}

fn column(field: &FieldSpec) -> String {
    let mut args = column_type(field.field_type).to_string();
    if field.required {
        args.push_str(", nullable=False");
    }
    if let Some(default) = &field.default
        && field.field_type != FieldType::Datetime
    {
        args.push_str(", default=");
        args.push_str(&literal(default));
    }
    format!("    {} = db.Column({args})", field.name)
}

pub fn models(blueprint: &Blueprint<'_>) -> String {
    let has_auth = blueprint.auth.is_some();
    let mut source = Source::new();
    source
        .line("from app import db")
        .line("from datetime import datetime")
        .blank();

    for (table, config) in blueprint.tables() {
        let fields: Vec<&FieldSpec> = config.fields.iter().filter(|f| f.name != "id").collect();

        source
            .line(format!("class {}(db.Model):", capitalize(&table)))
            .line(format!("    __tablename__ = {}", string_literal(&table)))
            .blank()
            .line("    id = db.Column(db.Integer, primary_key=True)");
        if has_auth {
            source.line("    owner_id = db.Column(db.Integer, db.ForeignKey('users.id'))");
        }
        for field in &fields {
            source.line(column(field));
        }

        source
            .blank()
            .line("    def to_dict(self):")
            .line("        return {")
            .line("            'id': self.id,");
        if has_auth {
            source.line("            'owner_id': self.owner_id,");
        }
        for field in &fields {
            let name = &field.name;
            if field.field_type == FieldType::Datetime {
                source.line(format!(
                    "            '{name}': self.{name}.isoformat() if self.{name} else None,"
                ));
            } else {
                source.line(format!("            '{name}': self.{name},"));
            }
        }
        source.line("        }").blank();
    }
    source.finish()
}

pub fn routes(blueprint: &Blueprint<'_>) -> String {
    let has_auth = blueprint.auth.is_some();
    let mut source = Source::new();
    source
        .line("from flask import request, jsonify")
        .line("from app import db")
        .line("from app.models import *")
        .line("from app.routes import api_bp");
    if has_auth {
        source.line("from flask_jwt_extended import jwt_required, get_jwt_identity");
    }
    source
        .blank()
        .line("@api_bp.route('/', methods=['GET'])")
        .line("def index():")
        .line("    return jsonify({'status': 'ok', 'message': 'API is running'})")
        .blank();

    let guard = |source: &mut Source| {
        if has_auth {
            source.line("@jwt_required()");
        }
    };

    for (table, config) in blueprint.tables() {
        let class = capitalize(&table);
        let lookup = if has_auth {
            format!("    item = {class}.query.filter_by(id=id, owner_id=get_jwt_identity()).first_or_404()")
        } else {
            format!("    item = {class}.query.get_or_404(id)")
        };

        source
            .line(format!("# Routes for {class}"))
            .line(format!("@api_bp.route('/{table}', methods=['GET'])"));
        guard(&mut source);
        source.line(format!("def get_{table}():"));
        if has_auth {
            source.line(format!(
                "    items = {class}.query.filter_by(owner_id=get_jwt_identity()).all()"
            ));
        } else {
            source.line(format!("    items = {class}.query.all()"));
        }
        source
            .line("    return jsonify([item.to_dict() for item in items])")
            .blank();

        source.line(format!("@api_bp.route('/{table}/<int:id>', methods=['GET'])"));
        guard(&mut source);
        source
            .line(format!("def get_{table}_item(id):"))
            .line(&lookup)
            .line("    return jsonify(item.to_dict())")
            .blank();

        source.line(format!("@api_bp.route('/{table}', methods=['POST'])"));
        guard(&mut source);
        source
            .line(format!("def create_{table}():"))
            .line("    data = request.get_json()")
            .line(format!("    new_item = {class}()"));
        if has_auth {
            source.line("    new_item.owner_id = get_jwt_identity()");
        }
        for field in config
            .fields
            .iter()
            .filter(|f| f.name != "id" && f.field_type != FieldType::Datetime)
        {
            let name = &field.name;
            source.line(format!("    if '{name}' in data: new_item.{name} = data['{name}']"));
        }
        source
            .line("    db.session.add(new_item)")
            .line("    db.session.commit()")
            .line("    return jsonify(new_item.to_dict()), 201")
            .blank();

        source.line(format!("@api_bp.route('/{table}/<int:id>', methods=['DELETE'])"));
        guard(&mut source);
        source
            .line(format!("def delete_{table}(id):"))
            .line(&lookup)
            .line("    db.session.delete(item)")
            .line("    db.session.commit()")
            .line("    return '', 204")
            .blank();
    }
    source.finish()
}
