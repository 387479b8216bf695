//! Stage-scoped system instructions for the reply generator.
//!
//! Pure string assembly. The generator is free text and may not obey these
//! instructions, so nothing here is authoritative — every state change is
//! decided by the engine, never by what the prompt asked for.

use crate::funnel::{FunnelStage, LeadStatus};
use crate::lead::Lead;

/// Facts interpolated into the instructions.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptContext<'a> {
    pub agency_name: &'a str,
    pub agent_name: &'a str,
    /// Title of the confirmed (or pending) property, when known.
    pub property_title: Option<&'a str>,
    /// Pre-formatted candidate list to offer, when one exists.
    pub suggestion_list: Option<&'a str>,
}

/// Spanish label for a missing qualification field, phrased as what still
/// needs to be asked.
fn field_label(field: &str) -> &'static str {
    match field {
        "propiedad_confirmada" => "confirmar cual es la propiedad exacta que le interesa",
        "comprador_confirmado" => "confirmar si la propiedad es para el cliente mismo",
        "motivo" => "el motivo de la busqueda (mudanza o inversion)",
        "financiacion" => "como va a financiar la operacion",
        "listo_para_cerrar" => "si puede avanzar en caso de que la propiedad le sirva",
        _ => "el dato pendiente",
    }
}

/// Assemble the full system instructions for one reply.
pub fn build_instructions(stage: FunnelStage, lead: &Lead, ctx: &PromptContext<'_>) -> String {
    let mut out = format!(
        "Sos {agent}, asesor de la inmobiliaria {agency}. Atendes consultas por WhatsApp.\n\
         Reglas de estilo, siempre:\n\
         - Respondes en espanol rioplatense, tono cordial y profesional.\n\
         - Mensajes cortos, maximo dos o tres oraciones.\n\
         - UNA sola pregunta por mensaje.\n\
         - No uses signos de interrogacion invertidos ni emojis.\n\
         - Nunca inventes propiedades, precios ni disponibilidad.\n",
        agent = ctx.agent_name,
        agency = ctx.agency_name,
    );

    out.push('\n');
    match stage {
        FunnelStage::Precalificacion => {
            out.push_str(
                "Etapa actual: precalificacion. Tu objetivo es identificar que propiedad \
                 concreta le interesa al cliente.\n",
            );
            let mut missing_details: Vec<&str> = Vec::new();
            if lead.neighborhood.is_none() {
                missing_details.push("en que barrio busca");
            }
            if lead.rooms.is_none() {
                missing_details.push("cuantos ambientes necesita");
            }
            if lead.budget.is_none() {
                missing_details.push("que presupuesto maneja");
            }
            if let Some(list) = ctx.suggestion_list {
                out.push_str("Tenes estas opciones para ofrecerle, presentalas tal cual:\n");
                out.push_str(list);
                out.push_str("\nPedile que elija una por numero.\n");
            } else if let Some(title) = ctx.property_title {
                out.push_str(&format!(
                    "Encontraste una propiedad candidata: {title}. \
                     Preguntale si es la que le interesa, sin dar nada por confirmado.\n"
                ));
            } else if !missing_details.is_empty() {
                out.push_str(&format!(
                    "Todavia falta saber: {}. Pregunta por UNO solo de esos datos.\n",
                    missing_details.join(", ")
                ));
            } else {
                out.push_str(
                    "Ya tenes los criterios de busqueda. Avisale que estas revisando opciones.\n",
                );
            }
        }
        FunnelStage::Calificacion => {
            out.push_str(
                "Etapa actual: calificacion. La propiedad ya esta confirmada",
            );
            if let Some(title) = ctx.property_title {
                out.push_str(&format!(" ({title})"));
            }
            out.push_str(
                ". No vuelvas a preguntar por barrio, ambientes ni cual propiedad quiere.\n",
            );
            let missing = lead.qualification.missing_fields();
            if missing.is_empty() {
                out.push_str("No queda nada por preguntar, agradece la informacion.\n");
            } else {
                out.push_str("Te falta averiguar, en este orden:\n");
                for field in &missing {
                    out.push_str(&format!("- {}\n", field_label(field)));
                }
                out.push_str("Pregunta SOLO por el primer punto pendiente.\n");
            }
        }
        FunnelStage::PostCalificacion => match lead.status {
            LeadStatus::Descalificado => {
                out.push_str(
                    "Etapa actual: cierre sin visita. El cliente no califica por ahora. \
                     Agradecele el interes, decile que por el momento no hay una opcion que \
                     encaje y que quedan en contacto. No agendes visitas ni prometas nada.\n",
                );
            }
            _ => {
                out.push_str(
                    "Etapa actual: coordinacion de visita. El cliente califica",
                );
                if let Some(title) = ctx.property_title {
                    out.push_str(&format!(" para visitar {title}"));
                }
                out.push_str(
                    ". Propone coordinar una visita y pedile dia y horario concretos \
                     (por ejemplo: viernes a las 15). No preguntes nada mas.\n",
                );
            }
        },
        FunnelStage::Finalizado => {
            out.push_str(
                "Etapa actual: proceso completado. La visita ya quedo agendada. \
                 Responde breve, confirma que esta todo coordinado y despedite cordialmente.\n",
            );
        }
    }

    out
}
