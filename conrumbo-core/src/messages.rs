// User-facing status and prompt strings. Spanish is the product language;
// wording (including the uneven accent usage) matches the deployed UI.

pub const MSG_READY: &str = "Sistema listo. Pulsa \"Iniciar\" para comenzar.";
pub const MSG_API_UNREACHABLE: &str =
    "No se pudo conectar con la API. Pulsa \"Configurar servidor\" e introduce la direccion correcta.";

pub const MSG_GREETING: &str = "Estoy escuchando. ¿Cuál es la situación?";

pub const MSG_MIC_PERMISSION: &str = "Necesito acceso al audio para ayudarte.";
pub const MSG_PREPARING_MIC: &str = "Preparando microfono...";
pub const MSG_RECORDING: &str = "Grabando... habla ahora.";
pub const MSG_MIC_STOPPED: &str = "Microfono detenido.";
pub const MSG_NO_AUDIO: &str = "No se capturo audio. Intentalo de nuevo.";

pub const MSG_TRANSCRIBING: &str = "Transcribiendo...";
pub const MSG_STT_FAILED: &str = "No se pudo transcribir el audio.";
pub const MSG_SR_UNSUPPORTED: &str = "Reconocimiento de voz no disponible.";
pub const MSG_SILENCE_RETRY: &str = "No se detecto voz. Escuchando de nuevo...";
pub const MSG_RETRY_PROMPT_SPOKEN: &str = "No he entendido. ¿Puedes repetir?";
pub const MSG_RESTART_PROMPT: &str =
    "No he entendido. Pulsa iniciar para intentarlo de nuevo.";

pub const MSG_PROCESSING: &str = "Procesando instruccion...";
pub const MSG_NO_MORE_INSTRUCTIONS: &str = "No hay mas instrucciones.";
pub const MSG_INSTRUCTION_READY: &str = "Instruccion lista. Te escucho de nuevo.";
pub const MSG_PROTOCOL_COMPLETE: &str =
    "Protocolo completado. Permanece atento a la ayuda profesional.";
pub const MSG_SPEECH_FAILED: &str =
    "No se pudo reproducir la instruccion en voz alta.";

pub fn error_status(message: &str) -> String {
    format!("Error: {message}")
}

/// Map a raw capture-layer failure onto a short actionable message. The raw
/// text carries the error variant names from the audio layer; matching on
/// them keeps this usable from anywhere without depending on those types.
pub fn user_facing_audio_error(raw: &str) -> String {
    if raw.contains("NoInputDevice") || raw.contains("no input device") {
        return "No se detecto ningun microfono. Conecta uno e intentalo de nuevo.".to_string();
    }
    if raw.contains("WorkerTimeout") || raw.contains("StopTimeout") || raw.contains("timeout") {
        return "El microfono no responde. Intentalo de nuevo.".to_string();
    }
    if raw.contains("build stream") || raw.contains("play stream") || raw.contains("Worker") {
        return "No se pudo iniciar la captura de audio. Revisa los permisos del microfono."
            .to_string();
    }
    MSG_MIC_PERMISSION.to_string()
}

/// Heading for a rendered step: an explicit title wins, then "Paso N", then
/// the generic fallback.
pub fn step_heading(number: Option<u32>, title: Option<&str>) -> String {
    if let Some(title) = title {
        let trimmed = title.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    match number {
        Some(n) => format!("Paso {n}"),
        None => "Instruccion".to_string(),
    }
}
