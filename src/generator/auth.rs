//! User model and auth routes

use crate::constants::AUTH_CORE_FIELDS;
use crate::generator::crud::column_type;
use crate::generator::python::Source;
use crate::models::{AuthConfig, ExtraField, FieldType};

/// Extra fields that become columns: core credentials and repeats are skipped
pub fn user_columns(config: &AuthConfig) -> Vec<&ExtraField> {
    let mut seen: Vec<&str> = Vec::new();
    config
        .extra_fields
        .iter()
        .filter(|field| {
            let name = field.name.as_str();
            if name.is_empty() || AUTH_CORE_FIELDS.contains(&name) || seen.contains(&name) {
                return false;
            }
            seen.push(name);
            true
        })
        .collect()
}

pub fn user_model(config: &AuthConfig) -> String {
    let columns = user_columns(config);
    let mut source = Source::new();
    source
        .line("from app import db")
        .line("from datetime import datetime")
        .blank()
        .line("class User(db.Model):")
        .line("    __tablename__ = 'users'")
        .line("    id = db.Column(db.Integer, primary_key=True)")
        .line("    email = db.Column(db.String(120), unique=True, nullable=False)")
        .line("    password_hash = db.Column(db.String(256), nullable=False)");

    for field in &columns {
        let column = match field.field_type {
            FieldType::Datetime => "db.DateTime",
            other => column_type(other),
        };
        let unique = if field.name == "username" { ", unique=True" } else { "" };
        let nullable = if field.required { ", nullable=False" } else { "" };
        source.line(format!(
            "    {} = db.Column({column}{unique}{nullable})",
            field.name
        ));
    }

    source
        .line("    created_at = db.Column(db.DateTime, default=datetime.utcnow)")
        .blank()
        .line("    def to_dict(self):")
        .line("        data = {")
        .line("            'id': self.id,")
        .line("            'email': self.email,")
        .line("            'created_at': self.created_at.isoformat()")
        .line("        }");
    for field in &columns {
        let name = &field.name;
        source.line(format!("        data['{name}'] = self.{name}"));
    }
    source.line("        return data");
    source.finish()
}

pub fn routes(config: &AuthConfig) -> String {
    let has_username = config.has_username();
    let mut source = Source::new();
    source
        .line("from flask import request, jsonify")
        .line("from flask_jwt_extended import create_access_token, jwt_required, get_jwt_identity")
        .line("import bcrypt")
        .line("from app import db")
        .line("from app.models.user import User")
        .line("from app.routes import api_bp")
        .blank()
        .line("@api_bp.route('/auth/register', methods=['POST'])")
        .line("def register():")
        .line("    data = request.get_json()")
        .line("    if User.query.filter_by(email=data.get('email')).first():")
        .line("        return jsonify({'error': 'Email already exists'}), 400");
    if has_username {
        source
            .line("    if data.get('username') and User.query.filter_by(username=data.get('username')).first():")
            .line("        return jsonify({'error': 'Username already exists'}), 400");
    }
    source
        .blank()
        .line("    hashed = bcrypt.hashpw(data.get('password').encode('utf-8'), bcrypt.gensalt()).decode('utf-8')")
        .line("    user = User(email=data.get('email'), password_hash=hashed)");
    for field in user_columns(config) {
        let name = &field.name;
        source.line(format!("    if '{name}' in data: user.{name} = data['{name}']"));
    }
    source
        .blank()
        .line("    db.session.add(user)")
        .line("    db.session.commit()")
        .line("    return jsonify(user.to_dict()), 201")
        .blank()
        .line("@api_bp.route('/auth/login', methods=['POST'])")
        .line("def login():")
        .line("    data = request.get_json()");
    if has_username {
        source
            .line("    # Support login by email or username")
            .line("    user = User.query.filter((User.email == data.get('email')) | (User.username == data.get('username'))).first()");
    } else {
        source.line("    user = User.query.filter_by(email=data.get('email')).first()");
    }
    source
        .line("    if user and bcrypt.checkpw(data.get('password').encode('utf-8'), user.password_hash.encode('utf-8')):")
        .line("        token = create_access_token(identity=str(user.id))")
        .line("        return jsonify({'access_token': token, 'user': user.to_dict()})")
        .line("    return jsonify({'error': 'Invalid credentials'}), 401")
        .blank()
        .line("@api_bp.route('/auth/me', methods=['GET'])")
        .line("@jwt_required()")
        .line("def me():")
        .line("    user_id = get_jwt_identity()")
        .line("    user = User.query.get_or_404(user_id)")
        .line("    return jsonify(user.to_dict())");
    source.finish()
}
