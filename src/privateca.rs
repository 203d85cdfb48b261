//! Schema metadata for the Certificate Authority Service resources.
//!
//! Four resource kinds are described here: [`ca_pool`], [`certificate_template`],
//! [`certificate_authority`] and [`certificate`]. Each schema is built once and
//! shared behind an [`Arc`], so reconcilers for the same kind reuse one copy.
//!
//! # Example
//!
//! ```
//! use hemmer_reconciler::privateca;
//!
//! let registry = privateca::registry();
//! let pool = registry.get("CaPool").unwrap();
//! assert!(pool.has_operation("update_ca_pool"));
//! assert_eq!(pool.identity_fields(), vec!["project", "location", "name"]);
//! ```

use std::sync::{Arc, OnceLock};

use crate::equivalence::Equivalence;
use crate::schema::{Block, FieldDescriptor, FieldKind, ResourceSchema, SchemaRegistry};

/// Update operation for pool policy, publishing options and labels.
pub const UPDATE_CA_POOL: &str = "update_ca_pool";
/// Update operation for every mutable template field.
pub const UPDATE_CERTIFICATE_TEMPLATE: &str = "update_certificate_template";
/// Update operation for authority labels.
pub const UPDATE_CERTIFICATE_AUTHORITY: &str = "update_certificate_authority";
/// Update operation for certificate labels.
pub const UPDATE_CERTIFICATE: &str = "update_certificate";

/// Schema for `CaPool`.
pub fn ca_pool() -> Arc<ResourceSchema> {
    static SCHEMA: OnceLock<Arc<ResourceSchema>> = OnceLock::new();
    SCHEMA
        .get_or_init(|| {
            let schema = ResourceSchema::new(
                "CaPool",
                "projects/{{project}}/locations/{{location}}/caPools/{{name}}",
            );
            let schema = with_location_fields(schema)
                .with_field(
                    "tier",
                    FieldDescriptor::enumeration()
                        .immutable()
                        .required()
                        .with_description("ENTERPRISE or DEVOPS"),
                )
                .with_field(
                    "issuance_policy",
                    FieldDescriptor::object(issuance_policy()).updated_by(UPDATE_CA_POOL),
                )
                .with_field(
                    "publishing_options",
                    FieldDescriptor::object(
                        Block::new()
                            .with_field("publish_ca_cert", zero_bool())
                            .with_field("publish_crl", zero_bool()),
                    )
                    .updated_by(UPDATE_CA_POOL),
                )
                .with_field(
                    "labels",
                    FieldDescriptor::map(FieldKind::String).updated_by(UPDATE_CA_POOL),
                )
                .with_operation(UPDATE_CA_POOL);
            Arc::new(schema)
        })
        .clone()
}

/// Schema for `CertificateTemplate`.
pub fn certificate_template() -> Arc<ResourceSchema> {
    static SCHEMA: OnceLock<Arc<ResourceSchema>> = OnceLock::new();
    SCHEMA
        .get_or_init(|| {
            let schema = ResourceSchema::new(
                "CertificateTemplate",
                "projects/{{project}}/locations/{{location}}/certificateTemplates/{{name}}",
            );
            let op = UPDATE_CERTIFICATE_TEMPLATE;
            let schema = with_location_fields(schema)
                .with_field(
                    "predefined_values",
                    FieldDescriptor::object(x509_parameters()).updated_by(op),
                )
                .with_field(
                    "identity_constraints",
                    FieldDescriptor::object(identity_constraints()).updated_by(op),
                )
                .with_field(
                    "passthrough_extensions",
                    FieldDescriptor::object(passthrough_extensions()).updated_by(op),
                )
                .with_field("description", FieldDescriptor::string().updated_by(op))
                .with_field("labels", FieldDescriptor::map(FieldKind::String).updated_by(op))
                .with_field("create_time", FieldDescriptor::string().output_only().immutable())
                .with_field("update_time", FieldDescriptor::string().output_only())
                .with_operation(op);
            Arc::new(schema)
        })
        .clone()
}

/// Schema for `CertificateAuthority`.
///
/// Identity includes the parent pool. Only labels can be changed in place;
/// the config, key spec and lifetime are fixed at creation.
pub fn certificate_authority() -> Arc<ResourceSchema> {
    static SCHEMA: OnceLock<Arc<ResourceSchema>> = OnceLock::new();
    SCHEMA
        .get_or_init(|| {
            let schema = ResourceSchema::new(
                "CertificateAuthority",
                "projects/{{project}}/locations/{{location}}/caPools/{{ca_pool}}/certificateAuthorities/{{name}}",
            );
            let schema = with_location_fields(schema)
                .with_field("ca_pool", FieldDescriptor::reference().required())
                .with_field("type", FieldDescriptor::enumeration().required())
                .with_field(
                    "config",
                    FieldDescriptor::object(certificate_config()).required().immutable(),
                )
                .with_field("lifetime", FieldDescriptor::string().required().immutable())
                .with_field(
                    "key_spec",
                    FieldDescriptor::object(
                        Block::new()
                            .with_field("cloud_kms_key_version", FieldDescriptor::reference())
                            .with_field("algorithm", FieldDescriptor::enumeration()),
                    )
                    .required()
                    .immutable(),
                )
                .with_field(
                    "subordinate_config",
                    FieldDescriptor::object(
                        Block::new()
                            .with_field("certificate_authority", FieldDescriptor::reference())
                            .with_field(
                                "pem_issuer_chain",
                                FieldDescriptor::object(Block::new().with_field(
                                    "pem_certificates",
                                    FieldDescriptor::list(FieldKind::String),
                                )),
                            ),
                    ),
                )
                .with_field("gcs_bucket", FieldDescriptor::string())
                .with_field(
                    "labels",
                    FieldDescriptor::map(FieldKind::String)
                        .updated_by(UPDATE_CERTIFICATE_AUTHORITY),
                )
                .with_field("tier", FieldDescriptor::enumeration().output_only())
                .with_field("state", FieldDescriptor::enumeration().output_only())
                .with_field(
                    "pem_ca_certificates",
                    FieldDescriptor::list(FieldKind::String).output_only(),
                )
                .with_field(
                    "access_urls",
                    FieldDescriptor::object(
                        Block::new()
                            .with_field("ca_certificate_access_url", FieldDescriptor::string())
                            .with_field(
                                "crl_access_urls",
                                FieldDescriptor::list(FieldKind::String),
                            ),
                    )
                    .output_only(),
                )
                .with_field("create_time", FieldDescriptor::string().output_only())
                .with_field("update_time", FieldDescriptor::string().output_only())
                .with_field("delete_time", FieldDescriptor::string().output_only())
                .with_field("expire_time", FieldDescriptor::string().output_only())
                .with_operation(UPDATE_CERTIFICATE_AUTHORITY);
            Arc::new(schema)
        })
        .clone()
}

/// Schema for `Certificate`.
pub fn certificate() -> Arc<ResourceSchema> {
    static SCHEMA: OnceLock<Arc<ResourceSchema>> = OnceLock::new();
    SCHEMA
        .get_or_init(|| {
            let schema = ResourceSchema::new(
                "Certificate",
                "projects/{{project}}/locations/{{location}}/caPools/{{ca_pool}}/certificates/{{name}}",
            );
            let schema = with_location_fields(schema)
                .with_field("ca_pool", FieldDescriptor::reference().required())
                .with_field("certificate_authority", FieldDescriptor::reference().input_only())
                .with_field("pem_csr", FieldDescriptor::string().immutable())
                .with_field("config", FieldDescriptor::object(certificate_config()).immutable())
                .with_field("lifetime", FieldDescriptor::string().required().immutable())
                .with_field("certificate_template", FieldDescriptor::reference())
                .with_field("subject_mode", FieldDescriptor::enumeration())
                .with_field(
                    "labels",
                    FieldDescriptor::map(FieldKind::String).updated_by(UPDATE_CERTIFICATE),
                )
                .with_field(
                    "issuer_certificate_authority",
                    FieldDescriptor::reference().output_only(),
                )
                .with_field(
                    "revocation_details",
                    FieldDescriptor::object(
                        Block::new()
                            .with_field("revocation_state", FieldDescriptor::enumeration())
                            .with_field("revocation_time", FieldDescriptor::string()),
                    )
                    .output_only(),
                )
                .with_field("pem_certificate", FieldDescriptor::string().output_only())
                .with_field(
                    "pem_certificate_chain",
                    FieldDescriptor::list(FieldKind::String).output_only(),
                )
                .with_field("create_time", FieldDescriptor::string().output_only())
                .with_field("update_time", FieldDescriptor::string().output_only())
                .with_operation(UPDATE_CERTIFICATE);
            Arc::new(schema)
        })
        .clone()
}

/// Registry holding all four schemas, keyed by kind.
pub fn registry() -> SchemaRegistry {
    SchemaRegistry::new()
        .with_resource(ca_pool())
        .with_resource(certificate_template())
        .with_resource(certificate_authority())
        .with_resource(certificate())
}

fn with_location_fields(schema: ResourceSchema) -> ResourceSchema {
    schema
        .with_field("name", FieldDescriptor::string().required())
        .with_field("project", FieldDescriptor::reference().required())
        .with_field("location", FieldDescriptor::string().required())
}

// The service omits false booleans and zero numbers from responses.
fn zero_bool() -> FieldDescriptor {
    FieldDescriptor::bool().with_equivalence(Equivalence::ZeroAsAbsent)
}

fn zero_int() -> FieldDescriptor {
    FieldDescriptor::int().with_equivalence(Equivalence::ZeroAsAbsent)
}

fn object_id() -> Block {
    Block::new().with_field(
        "object_id_path",
        FieldDescriptor::list(FieldKind::Int).required(),
    )
}

fn x509_extension() -> Block {
    Block::new()
        .with_field("object_id", FieldDescriptor::object(object_id()).required())
        .with_field("critical", zero_bool())
        .with_field("value", FieldDescriptor::string().required())
}

fn key_usage() -> Block {
    let base = [
        "digital_signature",
        "content_commitment",
        "key_encipherment",
        "data_encipherment",
        "key_agreement",
        "cert_sign",
        "crl_sign",
        "encipher_only",
        "decipher_only",
    ]
    .into_iter()
    .fold(Block::new(), |block, name| block.with_field(name, zero_bool()));

    let extended = [
        "server_auth",
        "client_auth",
        "code_signing",
        "email_protection",
        "time_stamping",
        "ocsp_signing",
    ]
    .into_iter()
    .fold(Block::new(), |block, name| block.with_field(name, zero_bool()));

    Block::new()
        .with_field("base_key_usage", FieldDescriptor::object(base))
        .with_field("extended_key_usage", FieldDescriptor::object(extended))
        .with_field(
            "unknown_extended_key_usages",
            FieldDescriptor::list(FieldKind::Object(object_id())),
        )
}

fn x509_parameters() -> Block {
    Block::new()
        .with_field("key_usage", FieldDescriptor::object(key_usage()))
        .with_field(
            "ca_options",
            FieldDescriptor::object(
                Block::new()
                    .with_field("is_ca", zero_bool())
                    .with_field("max_issuer_path_length", zero_int()),
            ),
        )
        .with_field(
            "policy_ids",
            FieldDescriptor::list(FieldKind::Object(object_id())),
        )
        .with_field("aia_ocsp_servers", FieldDescriptor::list(FieldKind::String))
        .with_field(
            "additional_extensions",
            FieldDescriptor::list(FieldKind::Object(x509_extension())),
        )
}

fn identity_constraints() -> Block {
    Block::new()
        .with_field(
            "cel_expression",
            FieldDescriptor::object(
                Block::new()
                    .with_field("expression", FieldDescriptor::string())
                    .with_field("title", FieldDescriptor::string())
                    .with_field("description", FieldDescriptor::string())
                    .with_field("location", FieldDescriptor::string()),
            ),
        )
        .with_field("allow_subject_passthrough", FieldDescriptor::bool().required())
        .with_field(
            "allow_subject_alt_names_passthrough",
            FieldDescriptor::bool().required(),
        )
}

fn passthrough_extensions() -> Block {
    Block::new()
        .with_field("known_extensions", FieldDescriptor::set(FieldKind::Enum))
        .with_field(
            "additional_extensions",
            FieldDescriptor::set(FieldKind::Object(object_id())),
        )
}

fn issuance_policy() -> Block {
    let allowed_key_type = Block::new()
        .with_field(
            "rsa",
            FieldDescriptor::object(
                Block::new()
                    .with_field("min_modulus_size", zero_int())
                    .with_field("max_modulus_size", zero_int()),
            ),
        )
        .with_field(
            "elliptic_curve",
            FieldDescriptor::object(
                Block::new().with_field("signature_algorithm", FieldDescriptor::enumeration()),
            ),
        );

    Block::new()
        .with_field(
            "allowed_key_types",
            FieldDescriptor::list(FieldKind::Object(allowed_key_type)),
        )
        .with_field("maximum_lifetime", FieldDescriptor::string())
        .with_field(
            "allowed_issuance_modes",
            FieldDescriptor::object(
                Block::new()
                    .with_field("allow_csr_based_issuance", zero_bool())
                    .with_field("allow_config_based_issuance", zero_bool()),
            ),
        )
        .with_field("baseline_values", FieldDescriptor::object(x509_parameters()))
        .with_field(
            "identity_constraints",
            FieldDescriptor::object(identity_constraints()),
        )
        .with_field(
            "passthrough_extensions",
            FieldDescriptor::object(passthrough_extensions()),
        )
}

fn certificate_config() -> Block {
    let subject = Block::new()
        .with_field("common_name", FieldDescriptor::string())
        .with_field("country_code", FieldDescriptor::string())
        .with_field("organization", FieldDescriptor::string())
        .with_field("organizational_unit", FieldDescriptor::string())
        .with_field("locality", FieldDescriptor::string())
        .with_field("province", FieldDescriptor::string())
        .with_field("street_address", FieldDescriptor::string())
        .with_field("postal_code", FieldDescriptor::string());

    let subject_alt_name = Block::new()
        .with_field("dns_names", FieldDescriptor::list(FieldKind::String))
        .with_field("uris", FieldDescriptor::list(FieldKind::String))
        .with_field("email_addresses", FieldDescriptor::list(FieldKind::String))
        .with_field("ip_addresses", FieldDescriptor::list(FieldKind::String));

    Block::new()
        .with_field(
            "subject_config",
            FieldDescriptor::object(
                Block::new()
                    .with_field("subject", FieldDescriptor::object(subject).required())
                    .with_field("subject_alt_name", FieldDescriptor::object(subject_alt_name)),
            )
            .required(),
        )
        .with_field(
            "x509_config",
            FieldDescriptor::object(x509_parameters()).required(),
        )
        .with_field(
            "public_key",
            FieldDescriptor::object(
                Block::new()
                    .with_field("key", FieldDescriptor::string().required())
                    .with_field("format", FieldDescriptor::enumeration().required()),
            ),
        )
}
