use ingest::Record;

use crate::task::AnnotationTask;

pub fn system_prompt(task: AnnotationTask) -> &'static str {
    match task {
        AnnotationTask::Translation => {
            r#"You are helping update a large graph database of Arabic words.
Be concise and do not exceed 1 or 2 words for each case unless it's a short phrase.
Return only the English translation, the Spanish translation, the Urdu translation and the Roman transliteration, in the following JSON format (no extra text):

{
  "english": "",
  "spanish": "",
  "urdu": "",
  "transliteration": ""
}"#
        }
        AnnotationTask::Classification => {
            "You are a helpful assistant trained to classify Arabic words or phrases. \
Classify each word in two parts: first as 'Concrete' or 'Abstract', and second into one of the following subclasses. \
For Concrete: 'MAA' (Movement and Action), 'HAB' (Human-Animal-Body), 'HGN' (Hunting-Gathering-Nature), or 'AI' (Agriculture-Industry). \
For Abstract: 'MS' (Mental States), 'MP' (Metaphysical), 'SOC' (Social), or 'LS' (Linguistic-Symbolic). \
Respond with two terms separated by a semicolon (e.g., 'Concrete; MAA'). \
If you cannot confidently classify the word, respond with 'NA; NA'."
        }
        AnnotationTask::Root => {
            "You are a linguistic expert specializing in Arabic morphology. \
Your task is to identify the root of Arabic words. \
Respond only with the root in the format: letter1-letter2-letter3 (add letter4 for quadriliteral roots). \
If the word has no identifiable root, respond with 'NA'."
        }
        AnnotationTask::GrammaticalForm => {
            "You are a helpful assistant trained to identify the grammatical nature of Arabic words. \
Classify the word or phrase into one of 9 categories: \
المصدر، اسم الفاعل، اسم المفعول، اسم المكان، اسم الحال، اسم الآلة، اسم ذات، اسم المبالغة، اسم العلة. \
Limit your response to exactly one of these categories. \
If there is not enough information, respond with 'NA'."
        }
        AnnotationTask::Wazn => {
            r#"أنت خبير في الصرف العربي. أعطِ للكلمة المعطاة فقط الوزن الصرفي القياسي الكامل بالتشكيل، مع تمثيله أيضًا في سطر واحد باستخدام الرموز:
 - استخدم الرقم 3 لحرف ع
 - استخدم 33 لتكرار ع مع الشدة

يجب أن تُرجع فقط كائن JSON بهذا الشكل:
{"id": "<نفس المعرف>", "wazn": "<وزن كامل بالتشكيل>", "form": "<transliteration>"}

إذا لم يوجد وزن معروف، استخدم:
{"id": "<نفس المعرف>", "wazn": "NA", "form": "NA"}

أمثلة:
{"id":"001","wazn":"فَعَلَ","form":"fa3ala"} ← كَتَبَ
{"id":"002","wazn":"فَعَّلَ","form":"fa33ala"} ← عَلَّمَ
{"id":"003","wazn":"أَفْعَلَ","form":"af3ala"} ← أَكْرَمَ
{"id":"011","wazn":"فِعَالٌ","form":"fi3āl"} ← كِتَابٌ
{"id":"017","wazn":"مَفْعُولٌ","form":"maf3ūlun"} ← مَقْبُولٌ

لا تُرجِع أي شرح. فقط كائن JSON."#
        }
        AnnotationTask::PartOfSpeech => {
            "You are a helpful assistant trained to identify the grammatical nature of Arabic words. \
Classify the word or phrase into one of these categories: noun, verb, phrase or letter. \
Limit your response to that single word. \
If there is not enough information, respond with 'NA'."
        }
    }
}

pub fn user_prompt(task: AnnotationTask, record: &Record) -> String {
    let word = &record.primary_text;
    let context = if task.uses_context() {
        record.context.as_deref()
    } else {
        None
    };

    match task {
        AnnotationTask::Translation => match context {
            Some(definition) => format!(
                "Translate the following Arabic word or phrase: '{}' and use this accompanying dictionary definition from Lane's Lexicon for context: {}",
                word, definition
            ),
            None => format!("Translate the following Arabic word or phrase: '{}'", word),
        },
        AnnotationTask::Classification => format!(
            "Please classify the following Arabic word or phrase: '{}' into a top-level category (Concrete or Abstract) and a subclass (e.g., 'Concrete; MAA').",
            word
        ),
        AnnotationTask::Root => format!(
            "Provide the root of the following Arabic word: '{}'. Respond only with the root in the format: letter1-letter2-letter3.",
            word
        ),
        AnnotationTask::GrammaticalForm => {
            let mut prompt = format!(
                "Classify the following Arabic word or phrase: '{}' as one of the following: {}.",
                word,
                crate::task::GRAMMATICAL_FORMS.join("، ")
            );
            if let Some(definition) = context {
                prompt.push_str(&format!(
                    " If necessary, use this accompanying dictionary definition from Lane's Lexicon for more context: {}",
                    definition
                ));
            }
            prompt
        }
        AnnotationTask::Wazn => format!("ID: \"{}\"\nWord: \"{}\"", record.correlation_id, word),
        AnnotationTask::PartOfSpeech => format!(
            "Please classify the following Arabic word or phrase: '{}' as either 'noun', 'verb', 'phrase' or 'letter'.",
            word
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        Record::new(
            "E7".to_string(),
            "كتاب".to_string(),
            Some("a book".to_string()),
        )
    }

    #[test]
    fn test_context_only_for_context_tasks() {
        assert!(user_prompt(AnnotationTask::Translation, &record()).contains("a book"));
        assert!(!user_prompt(AnnotationTask::Classification, &record()).contains("a book"));
    }

    #[test]
    fn test_wazn_prompt_carries_id() {
        let prompt = user_prompt(AnnotationTask::Wazn, &record());
        assert!(prompt.contains("ID: \"E7\""));
    }
}
