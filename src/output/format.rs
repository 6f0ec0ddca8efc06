//! Record presentation
//!
//! Renders a lookup payload as Markdown text. Missing fields show as `N/A`.

use std::fmt::Write;

use serde_json::Value;

use crate::models::LookupResponse;

const NA: &str = "N/A";
const MAX_NEIGHBOURS: usize = 10;

type Fields = &'static [(&'static str, &'static str)];

const BASIC_FIELDS: Fields = &[
    ("Nome", "nome"),
    ("CPF", "cpf"),
    ("CNS", "cns"),
    ("Data de Nascimento", "dataNascimento"),
    ("Sexo", "sexo"),
    ("Cor/Raça", "cor"),
    ("Nome da Mãe", "nomeMae"),
    ("Nome do Pai", "nomePai"),
    ("Município de Nascimento", "municipioNascimento"),
    ("Escolaridade", "escolaridade"),
    ("Estado Civil", "estadoCivil"),
    ("Nacionalidade", "nacionalidade"),
];

const ADDRESS_FIELDS: Fields = &[
    ("Complemento", "complemento"),
    ("Bairro", "bairro"),
    ("CEP", "cep"),
];

const EMAIL_FIELDS: Fields = &[
    ("Prioridade", "prioridade"),
    ("Qualidade", "qualidade"),
    ("Pessoal", "emailPessoal"),
    ("Blacklist", "blacklist"),
];

/// Render the record into a single Markdown document
pub fn format_record(record: &LookupResponse) -> String {
    let empty = Value::Null;
    let basic = record.get("DadosBasicos").unwrap_or(&empty);
    let economic = record.get("DadosEconomicos").unwrap_or(&empty);

    let mut out = String::from("📋 *CONSULTA COMPLETA DE CPF*\n\n");

    out.push_str("👤 *DADOS BÁSICOS*\n");
    write_fields(&mut out, basic, BASIC_FIELDS);
    let death = text_or(path(basic, &["obito", "obito"]), "NÃO");
    let _ = writeln!(out, "Óbito: {}", death);
    if death == "SIM" {
        if let Some(date) = text(path(basic, &["obito", "dataObito"])) {
            let _ = writeln!(out, "Data Óbito: {}", date);
        }
    }
    let _ = writeln!(
        out,
        "Situação Cadastral: {}",
        text_or(path(basic, &["situacaoCadastral", "descricaoSituacaoCadastral"]), NA)
    );
    out.push('\n');

    write_economic(&mut out, economic);
    write_addresses(&mut out, list(record.get("enderecos")));
    write_phones(&mut out, list(record.get("telefones")));
    write_emails(&mut out, list(record.get("emails")));
    write_relatives(&mut out, list(record.get("parentes")));
    write_neighbours(&mut out, list(record.get("vizinhos")));

    out.trim().to_string()
}

fn write_economic(out: &mut String, economic: &Value) {
    let income = text(economic.get("renda"));
    let score = economic.get("score").filter(|v| !v.is_null());
    if income.is_none() && score.is_none() {
        return;
    }

    out.push_str("💰 *DADOS ECONÔMICOS*\n");
    if let Some(income) = income {
        let _ = writeln!(out, "Renda: R$ {}", income);
    }
    if let Some(power) = economic.get("poderAquisitivo").filter(|v| !v.is_null()) {
        let _ = writeln!(
            out,
            "Poder Aquisitivo: {}",
            text_or(power.get("poderAquisitivoDescricao"), NA)
        );
    }
    if let Some(score) = score {
        let _ = writeln!(out, "Score CSB: {}", text_or(score.get("scoreCSB"), NA));
        let _ = writeln!(
            out,
            "Faixa Risco CSB: {}",
            text_or(score.get("scoreCSBFaixaRisco"), NA)
        );
    }
    if let Some(job) = economic.get("profissao").filter(|v| !v.is_null()) {
        let _ = writeln!(out, "Profissão: {}", text_or(job.get("cboDescricao"), NA));
    }
    out.push('\n');
}

fn write_addresses(out: &mut String, addresses: &[Value]) {
    if addresses.is_empty() {
        return;
    }
    out.push_str("📍 *ENDEREÇOS*\n");
    for (i, addr) in addresses.iter().enumerate() {
        let _ = writeln!(out, "\n*Endereço {}:*", i + 1);
        let _ = writeln!(
            out,
            "{} {}, {}",
            text_or(addr.get("tipoLogradouro"), ""),
            text_or(addr.get("logradouro"), ""),
            text_or(addr.get("logradouroNumero"), "")
        );
        write_fields(out, addr, ADDRESS_FIELDS);
        let _ = writeln!(
            out,
            "Cidade: {}/{}",
            text_or(addr.get("cidade"), NA),
            text_or(addr.get("uf"), NA)
        );
    }
    out.push('\n');
}

fn write_phones(out: &mut String, phones: &[Value]) {
    if phones.is_empty() {
        return;
    }
    out.push_str("📞 *TELEFONES*\n");
    for phone in phones {
        let whatsapp = phone.get("whatsapp").and_then(Value::as_bool).unwrap_or(false);
        let _ = writeln!(
            out,
            "{} - {}\nOperadora: {}\nWhatsApp: {}\n",
            text_or(phone.get("telefone"), NA),
            text_or(phone.get("tipo"), NA),
            text_or(phone.get("operadora"), NA),
            if whatsapp { "SIM" } else { "NÃO" }
        );
    }
}

fn write_emails(out: &mut String, emails: &[Value]) {
    if emails.is_empty() {
        return;
    }
    out.push_str("📧 *E-MAILS*\n");
    for email in emails {
        let _ = writeln!(out, "{}", text_or(email.get("email"), NA));
        write_fields(out, email, EMAIL_FIELDS);
        out.push('\n');
    }
}

fn write_relatives(out: &mut String, relatives: &[Value]) {
    if relatives.is_empty() {
        return;
    }
    out.push_str("👨‍👩‍👧‍👦 *PARENTES*\n");
    for (i, rel) in relatives.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. {}\n   CPF: {}\n   Grau: {}\n",
            i + 1,
            text_or(rel.get("nomeParente"), NA),
            text_or(rel.get("cpfParente"), NA),
            text_or(rel.get("grauParentesco"), NA)
        );
    }
}

fn write_neighbours(out: &mut String, neighbours: &[Value]) {
    if neighbours.is_empty() {
        return;
    }
    out.push_str("🏘️ *VIZINHOS*\n");
    for (i, n) in neighbours.iter().take(MAX_NEIGHBOURS).enumerate() {
        let _ = writeln!(
            out,
            "{}. {}\n   CPF: {}\n   Idade: {}\n",
            i + 1,
            text_or(n.get("nome"), NA),
            text_or(n.get("cpf"), NA),
            text_or(n.get("idade"), NA)
        );
    }
    if neighbours.len() > MAX_NEIGHBOURS {
        let _ = writeln!(
            out,
            "... e mais {} vizinho(s)",
            neighbours.len() - MAX_NEIGHBOURS
        );
    }
}

fn write_fields(out: &mut String, obj: &Value, fields: Fields) {
    for (label, key) in fields {
        let _ = writeln!(out, "{}: {}", label, text_or(obj.get(*key), NA));
    }
}

fn path<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().try_fold(value, |v, k| v.get(*k))
}

fn list(value: Option<&Value>) -> &[Value] {
    value.and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

/// Scalar rendered as text; null, empty strings and containers count as missing
fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "SIM" } else { "NÃO" }.to_string()),
        _ => None,
    }
}

fn text_or(value: Option<&Value>, default: &str) -> String {
    text(value).unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> LookupResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_basic_section_with_missing_fields() {
        let text = format_record(&record(json!({
            "status": 200,
            "DadosBasicos": { "nome": "FULANO DE TAL", "cpf": "12345678900", "sexo": "" }
        })));

        assert!(text.starts_with("📋 *CONSULTA COMPLETA DE CPF*"));
        assert!(text.contains("Nome: FULANO DE TAL\n"));
        assert!(text.contains("CPF: 12345678900\n"));
        assert!(text.contains("Sexo: N/A\n"));
        assert!(text.contains("Óbito: NÃO\n"));
        assert!(!text.contains("ENDEREÇOS"));
    }

    #[test]
    fn test_death_date_only_when_deceased() {
        let text = format_record(&record(json!({
            "status": 200,
            "DadosBasicos": { "obito": { "obito": "SIM", "dataObito": "2020-01-01" } }
        })));
        assert!(text.contains("Óbito: SIM\nData Óbito: 2020-01-01"));
    }

    #[test]
    fn test_lists_render_in_order() {
        let text = format_record(&record(json!({
            "status": 200,
            "DadosBasicos": {},
            "enderecos": [
                { "logradouro": "RUA A", "cidade": "SAO PAULO", "uf": "SP" },
                { "logradouro": "RUA B" }
            ],
            "telefones": [{ "telefone": "11999999999", "tipo": "CELULAR", "whatsapp": true }],
            "emails": [{ "email": "a@b.com" }]
        })));

        let first = text.find("*Endereço 1:*").unwrap();
        let second = text.find("*Endereço 2:*").unwrap();
        assert!(first < second);
        assert!(text.contains("Cidade: SAO PAULO/SP"));
        assert!(text.contains("11999999999 - CELULAR\nOperadora: N/A\nWhatsApp: SIM"));
        assert!(text.contains("a@b.com\nPrioridade: N/A"));
    }

    #[test]
    fn test_neighbours_are_capped() {
        let neighbours: Vec<Value> = (0..13).map(|i| json!({ "nome": format!("V{}", i) })).collect();
        let text = format_record(&record(json!({
            "status": 200,
            "DadosBasicos": {},
            "vizinhos": neighbours
        })));

        assert!(text.contains("10. V9"));
        assert!(!text.contains("V10"));
        assert!(text.contains("... e mais 3 vizinho(s)"));
    }

    #[test]
    fn test_economic_section_skipped_when_empty() {
        let text = format_record(&record(json!({
            "status": 200,
            "DadosBasicos": {},
            "DadosEconomicos": { "renda": null }
        })));
        assert!(!text.contains("DADOS ECONÔMICOS"));

        let text = format_record(&record(json!({
            "status": 200,
            "DadosBasicos": {},
            "DadosEconomicos": { "renda": "2500,00", "score": { "scoreCSB": 700 } }
        })));
        assert!(text.contains("Renda: R$ 2500,00"));
        assert!(text.contains("Score CSB: 700"));
    }
}
